//! Identity index
//!
//! Session-scoped map from external identifiers to the host handles produced
//! for them. Lookups fall back to scanning the document for a persisted
//! identifier attribute (then for a matching element uid) and cache-fill the
//! index on a hit, so repeated resolution of the same identifier is O(1).

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::host::{Document, ElementId, ATTR_EXTERNAL_ID};

#[derive(Debug, Default)]
pub struct IdentityIndex {
    map: HashMap<String, Vec<ElementId>>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append handles for `identifier`. No-op on an empty identifier.
    ///
    /// Returns true when at least one handle was newly added; callers use
    /// this to trigger the deferred queue's unlock check for the identifier.
    pub fn record(&mut self, identifier: &str, handles: &[ElementId]) -> bool {
        if identifier.is_empty() || handles.is_empty() {
            return false;
        }
        let list = self.map.entry(identifier.to_string()).or_default();
        let mut added = false;
        for &h in handles {
            if !list.contains(&h) {
                list.push(h);
                added = true;
            }
        }
        if added {
            debug!(identifier, handles = list.len(), "identity recorded");
        }
        added
    }

    /// In-session handles only; no document fallback
    pub fn lookup(&self, identifier: &str) -> Option<&[ElementId]> {
        self.map.get(identifier).map(Vec::as_slice)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.map.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve `identifier` to host handles.
    ///
    /// Order: in-session index, then the persisted identifier attribute,
    /// then a raw element uid match. Fallback hits are recorded into the
    /// index before being returned. An empty result means "not yet
    /// available", never a hard failure.
    pub fn resolve(&mut self, identifier: &str, doc: &Document) -> Vec<ElementId> {
        if identifier.is_empty() {
            return Vec::new();
        }
        if let Some(handles) = self.map.get(identifier) {
            return handles.clone();
        }

        let stamped = doc.find_by_attribute(ATTR_EXTERNAL_ID, identifier);
        if let Some(&first) = stamped.first() {
            if stamped.len() > 1 {
                warn!(
                    identifier,
                    matches = stamped.len(),
                    "ambiguous external identifier; taking the first match"
                );
            }
            self.record(identifier, &[first]);
            return vec![first];
        }

        if let Some(el) = doc.find_by_uid(identifier) {
            let id = el.id;
            self.record(identifier, &[id]);
            return vec![id];
        }

        Vec::new()
    }

    /// True when `resolve` would return at least one handle
    pub fn is_resolvable(&mut self, identifier: &str, doc: &Document) -> bool {
        !self.resolve(identifier, doc).is_empty()
    }
}
