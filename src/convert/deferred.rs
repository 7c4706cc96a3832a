//! Deferred resolution queue
//!
//! Holds inbound nodes whose dependency identifiers are not yet present in
//! the identity index. Per entry: `Pending(node, unresolved) -> Ready(node)
//! -> {Converted | FailedFinal}`. The `Ready` transition fires from the
//! unlock check when the index gains a key; whatever is still pending after
//! the main batch is drained once more by the terminal flush, with deferral
//! disabled so nothing re-queues forever.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::interchange::Node;

/// A node waiting for its dependency keys
#[derive(Debug)]
pub struct DeferredEntry {
    pub node: Node,
    pub unresolved: BTreeSet<String>,
    /// Report/dedupe key: the node's external identifier or a generated one
    pub dedupe_key: String,
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: IndexMap<String, DeferredEntry>,
    flushing: bool,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a node to `Pending`, keyed by `dedupe_key`.
    ///
    /// Returns false when an entry with the same key is already pending, so
    /// repeated attempts never duplicate the entry.
    pub fn defer(&mut self, dedupe_key: &str, node: Node, unresolved: BTreeSet<String>) -> bool {
        if self.pending.contains_key(dedupe_key) {
            return false;
        }
        debug!(
            key = dedupe_key,
            waiting_on = unresolved.len(),
            "conversion deferred"
        );
        self.pending.insert(
            dedupe_key.to_string(),
            DeferredEntry {
                node,
                unresolved,
                dedupe_key: dedupe_key.to_string(),
            },
        );
        true
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Unlock check for a newly recorded identifier.
    ///
    /// Entries waiting on `key` whose unresolved sets are now fully
    /// resolvable move to `Ready`: they are removed from `Pending` before
    /// being returned, so nothing processes them twice.
    pub fn take_ready(
        &mut self,
        key: &str,
        mut resolvable: impl FnMut(&str) -> bool,
    ) -> Vec<DeferredEntry> {
        let ready_keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| {
                entry.unresolved.contains(key) && entry.unresolved.iter().all(|k| resolvable(k))
            })
            .map(|(k, _)| k.clone())
            .collect();

        ready_keys
            .iter()
            .filter_map(|k| self.pending.shift_remove(k))
            .collect()
    }

    /// Terminal drain: everything still pending, in insertion order
    pub fn drain_pending(&mut self) -> Vec<DeferredEntry> {
        let drained: Vec<DeferredEntry> =
            std::mem::take(&mut self.pending).into_values().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "terminal flush of deferred entries");
        }
        drained
    }
}
