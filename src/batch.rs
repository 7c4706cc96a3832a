//! Batch conversion orchestrator
//!
//! Drives a full batch in either direction: per-item dispatch with failure
//! isolation, at-most-once dedupe, cooperative cancellation and UI yields,
//! the inbound partition into immediate and deferred-by-construction
//! subsets, and the terminal flush of the deferred queue. Only two
//! conditions terminate a batch: nothing converted at all, and explicit
//! cancellation.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::convert::inbound;
use crate::convert::{outbound, CancelFlag, Outcome, Session, UiYield};
use crate::error::{ExchangeError, Result};
use crate::host::{Document, ElementId};
use crate::interchange::{Attachment, Node, NodeBody};
use crate::report::{ConversionReport, Status};
use crate::settings::Settings;

/// Knobs for one batch run
pub struct BatchOptions {
    pub cancel: CancelFlag,
    /// Called inline, rate-limited, to keep a host UI responsive
    pub yield_hook: Option<Box<dyn FnMut()>>,
    pub yield_interval: Duration,
    /// Bounded wait for dependency elements to settle into the index
    pub settle_timeout: Duration,
    pub settle_poll: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            cancel: CancelFlag::new(),
            yield_hook: None,
            yield_interval: UiYield::DEFAULT_INTERVAL,
            settle_timeout: Session::DEFAULT_SETTLE_TIMEOUT,
            settle_poll: Session::DEFAULT_SETTLE_POLL,
        }
    }
}

impl BatchOptions {
    fn into_session_and_yield<'a>(self, settings: &'a Settings) -> (Session<'a>, UiYield) {
        let mut session = Session::new(settings);
        session.cancel = self.cancel;
        session.settle_timeout = self.settle_timeout;
        session.settle_poll = self.settle_poll;
        (session, UiYield::new(self.yield_hook, self.yield_interval))
    }
}

/// One inbound result row: the report key, its terminal status, and the
/// host handles produced for it (empty on skip/failure)
#[derive(Debug, Clone)]
pub struct InboundResult {
    pub key: String,
    pub status: Status,
    pub handles: Vec<ElementId>,
}

/// Convert selected host elements into one interchange-graph root.
///
/// Per-item failures are downgraded to report entries; the batch continues.
pub fn convert_outbound(
    doc: &Document,
    selection: &[ElementId],
    settings: &Settings,
    options: BatchOptions,
) -> Result<(Node, ConversionReport)> {
    if selection.is_empty() {
        return Err(ExchangeError::EmptySelection);
    }

    let span = tracing::info_span!("send", objects = selection.len());
    let _guard = span.enter();

    let (mut session, mut yielder) = options.into_session_and_yield(settings);
    let mut root = Node::new(NodeBody::Collection {
        name: "converted elements".to_string(),
    });
    let mut converted_count = 0usize;
    let mut cancelled = false;

    for &id in selection {
        if session.cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let key = match doc.get(id) {
            Some(el) => el.uid.clone(),
            None => {
                session.report.record(
                    id.to_string(),
                    Status::Failed,
                    "element",
                    format!("element {id} not found in the document"),
                );
                continue;
            }
        };

        // at-most-once per batch, even when reachable via multiple parents
        if session.report.contains(&key) {
            debug!(%id, "already converted in this batch");
            continue;
        }

        let descriptor = doc.get(id).map(|el| el.kind.to_string()).unwrap_or_default();
        match outbound::convert_element(&mut session, doc, id) {
            Outcome::Converted(mut node) => {
                if node.application_id.as_deref() != Some(key.as_str()) {
                    debug!(%id, "conversion result had a different application id; realigning");
                    node.application_id = Some(key.clone());
                }
                session.report.record(
                    &key,
                    Status::Created,
                    &descriptor,
                    format!("sent as {}", node.type_tag()),
                );
                root.push_child("elements", Attachment::Detached, node);
                converted_count += 1;
            }
            Outcome::Skipped(reason) => {
                session.report.record(&key, Status::Skipped, &descriptor, reason);
            }
            Outcome::Failed(reason) => {
                warn!(%id, reason = %reason, "conversion failed");
                session.report.record(&key, Status::Failed, &descriptor, reason);
            }
        }

        yielder.tick();
    }

    info!(converted = converted_count, report = %session.report.summary(), "send batch finished");

    if cancelled {
        return Err(ExchangeError::Cancelled {
            report: session.report,
            total: selection.len(),
        });
    }
    if converted_count == 0 {
        return Err(ExchangeError::NothingConverted);
    }
    Ok((root, session.report))
}

/// Convert a batch of interchange nodes into host elements.
///
/// Connection nodes are deferred by construction: they run after every other
/// node regardless of dependency state, then the deferred queue is flushed.
pub fn convert_inbound(
    doc: &mut Document,
    nodes: &[Node],
    settings: &Settings,
    options: BatchOptions,
) -> Result<(Vec<InboundResult>, ConversionReport)> {
    let span = tracing::info_span!("receive", objects = nodes.len());
    let _guard = span.enter();

    let (mut session, mut yielder) = options.into_session_and_yield(settings);

    // deferred-by-construction kinds go last so their dependencies have the
    // best chance of already existing
    let (deferred_by_construction, immediate): (Vec<&Node>, Vec<&Node>) = nodes
        .iter()
        .partition(|n| matches!(n.body, NodeBody::Connection { .. }));

    let keyed: Vec<(String, &Node)> = immediate
        .into_iter()
        .chain(deferred_by_construction)
        .map(|n| (report_key(n), n))
        .collect();

    for (key, node) in keyed {
        if session.cancel.is_cancelled() {
            return Err(ExchangeError::Cancelled {
                report: session.report,
                total: nodes.len(),
            });
        }
        if session.report.contains(&key) {
            debug!(key = %key, "already converted in this batch");
            continue;
        }

        let outcome = inbound::convert_node(&mut session, doc, node, &key, true);
        inbound::record_outcome(&mut session, &key, node, &outcome);
        yielder.tick();
    }

    // terminal flush: one more attempt for everything still pending, with
    // deferral disabled; success or failure is recorded either way
    session.deferred.set_flushing(true);
    let pending = session.deferred.drain_pending();
    for entry in pending {
        let outcome = inbound::convert_node(&mut session, doc, &entry.node, &entry.dedupe_key, false);
        inbound::record_outcome(&mut session, &entry.dedupe_key, &entry.node, &outcome);
    }
    session.deferred.set_flushing(false);

    info!(report = %session.report.summary(), "receive batch finished");

    if !nodes.is_empty() && session.report.successes() == 0 {
        return Err(ExchangeError::NothingConverted);
    }

    let results = session
        .report
        .entries()
        .map(|(key, entry)| InboundResult {
            key: key.clone(),
            status: entry.status,
            handles: session.produced.get(key).cloned().unwrap_or_default(),
        })
        .collect();

    Ok((results, session.report))
}

/// The node's external identifier, or a generated fallback for nodes that
/// never came from a host element
fn report_key(node: &Node) -> String {
    node.application_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
