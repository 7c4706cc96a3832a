//! Inbound dispatch: interchange nodes to host elements
//!
//! Each node is routed to a typed routine that builds a native element spec
//! and a placement preference list, then goes through the upsert reconciler.
//! Connection nodes whose dependency identifiers are not yet resolvable are
//! handed to the deferred queue; recording a new identity triggers the
//! unlock check, which retries any entry whose dependencies just completed,
//! with further deferral disabled.

use std::collections::BTreeSet;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::convert::{reconcile, Disposition, Session};
use crate::host::{Category, Document, ElementId, ElementKind, NewElement, Placement};
use crate::interchange::{Node, NodeBody};
use crate::report::Status;

/// Result of one inbound dispatch
#[derive(Debug)]
pub enum InboundOutcome {
    Converted {
        handles: Vec<ElementId>,
        disposition: Disposition,
    },
    /// Moved to the deferred queue; a terminal status follows later
    Deferred,
    Skipped(String),
    Failed(String),
}

/// Route one node to its conversion routine.
///
/// `key` is the report/dedupe key (the node's external identifier or a
/// generated fallback); `allow_defer` is false on retries so nothing
/// re-queues forever.
pub fn convert_node(
    session: &mut Session,
    doc: &mut Document,
    node: &Node,
    key: &str,
    allow_defer: bool,
) -> InboundOutcome {
    if session.settings.preview_only() {
        return InboundOutcome::Skipped("preview mode: no host elements created".to_string());
    }

    if node.is_aggregate() {
        return InboundOutcome::Skipped(
            "aggregate container; children are converted individually".to_string(),
        );
    }

    if session.settings.receive_as_mesh() {
        return displayable_to_native(session, doc, node, key);
    }

    debug!(key, tag = node.type_tag(), "converting node");

    match &node.body {
        NodeBody::Collection { .. } => unreachable!("aggregates are handled above"),
        NodeBody::Level { name, elevation } => {
            let mut spec = NewElement::new(ElementKind::Level, name.clone());
            spec.base_point = Some([0.0, 0.0, *elevation]);
            apply(session, doc, node, key, spec, &[Placement::Free])
        }
        NodeBody::Wall {
            base_line,
            height,
            level_id,
        } => {
            let mut spec = NewElement::new(ElementKind::Wall, node_name(node, "Wall"));
            spec.footprint = base_line.to_vec();
            spec.base_point = Some(base_line[0]);
            spec.footprint.push([base_line[1][0], base_line[1][1], *height]);
            apply_leveled(session, doc, node, key, spec, level_id.as_deref())
        }
        NodeBody::Floor { outline, level_id } => {
            let mut spec = NewElement::new(ElementKind::Floor, node_name(node, "Floor"));
            spec.footprint = outline.clone();
            apply_leveled(session, doc, node, key, spec, level_id.as_deref())
        }
        NodeBody::Opening { outline, host_id } => {
            let mut spec = NewElement::new(ElementKind::Opening, node_name(node, "Opening"));
            spec.footprint = outline.clone();
            let placements = match host_id.as_deref() {
                Some(host_key) => {
                    let hosts = session.index.resolve(host_key, doc);
                    match hosts.first() {
                        Some(&h) => vec![Placement::HostedByElement(h)],
                        None => {
                            return InboundOutcome::Failed(format!(
                                "host element '{host_key}' not found for opening"
                            ));
                        }
                    }
                }
                None => vec![Placement::Free],
            };
            apply(session, doc, node, key, spec, &placements)
        }
        NodeBody::ModelCurve { points } => {
            let mut spec = NewElement::new(ElementKind::ModelCurve, node_name(node, "ModelCurve"));
            spec.footprint = points.clone();
            apply(session, doc, node, key, spec, &[Placement::Free])
        }
        NodeBody::RoomBoundary { points } => {
            let mut spec =
                NewElement::new(ElementKind::ModelCurve, node_name(node, "RoomBoundary"));
            spec.category = Category::RoomSeparation;
            spec.footprint = points.clone();
            apply(session, doc, node, key, spec, &[Placement::Free])
        }
        NodeBody::Instance {
            family,
            type_name,
            base_point,
            rotation,
            level_id,
            host_id,
        } => {
            let mut spec = NewElement::new(ElementKind::FamilyInstance, type_name.clone());
            spec.family = Some(family.clone());
            spec.type_name = Some(type_name.clone());
            spec.base_point = Some(*base_point);
            spec.rotation = *rotation;

            let mut placements = Vec::new();
            if let Some(host_key) = host_id.as_deref() {
                if let Some(&h) = session.index.resolve(host_key, doc).first() {
                    placements.push(Placement::HostedByElement(h));
                }
            }
            if let Some(level_key) = level_id.as_deref() {
                if let Some(&l) = session.index.resolve(level_key, doc).first() {
                    placements.push(Placement::OnLevel(l));
                }
            }
            placements.push(Placement::Free);
            apply(session, doc, node, key, spec, &placements)
        }
        NodeBody::Connection { .. } => connection_to_native(session, doc, node, key, allow_defer),
        NodeBody::Generic {
            source_kind,
            display_mesh,
        } => {
            let mut spec = NewElement::new(
                ElementKind::DirectShape,
                node_name(node, &format!("Generic {source_kind}")),
            );
            spec.footprint = display_mesh.clone();
            apply(session, doc, node, key, spec, &[Placement::Free])
        }
    }
}

/// Record an outcome into the report under `key`
pub(crate) fn record_outcome(
    session: &mut Session,
    key: &str,
    node: &Node,
    outcome: &InboundOutcome,
) {
    let tag = node.type_tag();
    match outcome {
        InboundOutcome::Converted { disposition, .. } => {
            session
                .report
                .record(key, disposition.status(), tag, format!("received as {tag}"));
        }
        InboundOutcome::Deferred => {
            session
                .report
                .record(key, Status::Skipped, tag, "deferred: waiting for dependencies");
        }
        InboundOutcome::Skipped(reason) => {
            session.report.record(key, Status::Skipped, tag, reason.clone());
        }
        InboundOutcome::Failed(reason) => {
            session.report.record(key, Status::Failed, tag, reason.clone());
        }
    }
}

/// Face-projected placement against the first resolved connected host, with
/// level and free fallbacks. Missing hosts defer the node unless deferral is
/// disabled, in which case a bounded settle wait is the last resort.
fn connection_to_native(
    session: &mut Session,
    doc: &mut Document,
    node: &Node,
    key: &str,
    allow_defer: bool,
) -> InboundOutcome {
    let NodeBody::Connection {
        family,
        type_name,
        base_point,
        rotation,
        connected_ids,
    } = &node.body
    else {
        unreachable!("caller matched Connection");
    };

    let missing: BTreeSet<String> = connected_ids
        .iter()
        .filter(|k| !session.index.is_resolvable(k, doc))
        .cloned()
        .collect();

    if !missing.is_empty() {
        if allow_defer && !session.deferred.is_flushing() {
            session.deferred.defer(key, node.clone(), missing);
            return InboundOutcome::Deferred;
        }
        let still_missing = wait_for_dependencies(session, doc, connected_ids);
        if !still_missing.is_empty() {
            return InboundOutcome::Failed(format!(
                "missing dependency: {}",
                still_missing.join(", ")
            ));
        }
    }

    let hosts: Vec<ElementId> = connected_ids
        .iter()
        .flat_map(|k| session.index.resolve(k, doc))
        .collect();

    let mut spec = NewElement::new(ElementKind::FamilyInstance, type_name.clone());
    spec.category = Category::Connections;
    spec.family = Some(family.clone());
    spec.type_name = Some(type_name.clone());
    spec.base_point = *base_point;
    spec.rotation = *rotation;

    let mut placements = Vec::new();
    if let Some(&host) = hosts.first() {
        let point = base_point
            .or_else(|| doc.get(host).and_then(|h| h.base_point))
            .unwrap_or_default();
        placements.push(Placement::OnFace { host, point });
    }
    if let Some(level) = doc.nearest_level(base_point.map(|p| p[2]).unwrap_or(0.0)) {
        placements.push(Placement::OnLevel(level));
    }
    placements.push(Placement::Free);

    apply(session, doc, node, key, spec, &placements)
}

/// Bounded poll for dependency elements to settle into the index.
///
/// Returns the identifiers still missing when the deadline passes.
fn wait_for_dependencies(
    session: &mut Session,
    doc: &Document,
    keys: &[String],
) -> Vec<String> {
    let deadline = Instant::now() + session.settle_timeout;
    loop {
        let missing: Vec<String> = keys
            .iter()
            .filter(|k| !session.index.is_resolvable(k, doc))
            .cloned()
            .collect();
        if missing.is_empty() || Instant::now() >= deadline {
            return missing;
        }
        std::thread::sleep(session.settle_poll);
    }
}

/// Generic mesh path used when every node is received as a plain mesh
fn displayable_to_native(
    session: &mut Session,
    doc: &mut Document,
    node: &Node,
    key: &str,
) -> InboundOutcome {
    let Some(points) = node.display_points() else {
        return InboundOutcome::Skipped("no displayable geometry".to_string());
    };
    let mut spec = NewElement::new(
        ElementKind::DirectShape,
        node_name(node, node.type_tag()),
    );
    spec.footprint = points;
    apply(session, doc, node, key, spec, &[Placement::Free])
}

/// Level placement when the referenced level resolves, free otherwise
fn apply_leveled(
    session: &mut Session,
    doc: &mut Document,
    node: &Node,
    key: &str,
    spec: NewElement,
    level_id: Option<&str>,
) -> InboundOutcome {
    let mut placements = Vec::new();
    if let Some(level_key) = level_id {
        if let Some(&l) = session.index.resolve(level_key, doc).first() {
            placements.push(Placement::OnLevel(l));
        }
    }
    placements.push(Placement::Free);
    apply(session, doc, node, key, spec, &placements)
}

fn apply(
    session: &mut Session,
    doc: &mut Document,
    node: &Node,
    key: &str,
    spec: NewElement,
    placements: &[Placement],
) -> InboundOutcome {
    match reconcile::upsert(
        doc,
        &mut session.index,
        node.application_id.as_deref(),
        spec,
        placements,
    ) {
        Ok((id, disposition)) => {
            record_converted(session, doc, key, node.application_id.as_deref(), &[id]);
            InboundOutcome::Converted {
                handles: vec![id],
                disposition,
            }
        }
        Err(e) => InboundOutcome::Failed(e.to_string()),
    }
}

/// Register produced handles and run the unlock check for the identifier.
///
/// Any pending entry whose dependencies just completed is retried here,
/// inside a flush scope so it cannot re-defer.
pub(crate) fn record_converted(
    session: &mut Session,
    doc: &mut Document,
    report_key: &str,
    external_id: Option<&str>,
    handles: &[ElementId],
) {
    session
        .produced
        .entry(report_key.to_string())
        .or_default()
        .extend_from_slice(handles);

    let Some(external_id) = external_id.filter(|id| !id.is_empty()) else {
        debug!(report_key, "converted node carries no external identifier");
        return;
    };
    if session.index.record(external_id, handles) {
        drain_ready(session, doc, external_id);
    }
}

fn drain_ready(session: &mut Session, doc: &mut Document, unlocked_key: &str) {
    let ready = {
        let Session {
            index, deferred, ..
        } = session;
        deferred.take_ready(unlocked_key, |k| !index.resolve(k, doc).is_empty())
    };
    if ready.is_empty() {
        return;
    }

    let was_flushing = session.deferred.is_flushing();
    session.deferred.set_flushing(true);
    for entry in ready {
        debug!(key = %entry.dedupe_key, "dependencies resolved; retrying deferred conversion");
        let outcome = convert_node(session, doc, &entry.node, &entry.dedupe_key, false);
        record_outcome(session, &entry.dedupe_key, &entry.node, &outcome);
    }
    session.deferred.set_flushing(was_flushing);
}

fn node_name(node: &Node, fallback: &str) -> String {
    node.extras
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
