//! Conversion report
//!
//! The single source of truth for partial success: after a batch completes,
//! every input object has exactly one terminal entry, keyed by its external
//! identifier. Entries are created lazily the first time an object is seen
//! and overwritten by later attempts in the same batch (a deferred entry's
//! placeholder is replaced by its terminal status at flush time).

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Terminal status of one converted object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Created | Status::Updated)
    }
}

/// One report entry per source object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub status: Status,
    /// Human-readable descriptor of the source object
    pub object_type: String,
    pub notes: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Running report over one batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionReport {
    entries: IndexMap<String, ReportEntry>,
}

impl ConversionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Record the outcome of a conversion attempt.
    ///
    /// A second record for the same id replaces the status and appends the
    /// note; this is how a deferred placeholder becomes terminal.
    pub fn record(
        &mut self,
        id: impl Into<String>,
        status: Status,
        object_type: &str,
        note: impl Into<String>,
    ) {
        let id = id.into();
        let note = note.into();
        match self.entries.get_mut(&id) {
            Some(entry) => {
                debug!(id = %id, from = ?entry.status, to = ?status, "report entry updated");
                entry.status = status;
                entry.recorded_at = Utc::now();
                if !note.is_empty() {
                    entry.notes.push(note);
                }
            }
            None => {
                let mut notes = Vec::new();
                if !note.is_empty() {
                    notes.push(note);
                }
                self.entries.insert(
                    id,
                    ReportEntry {
                        status,
                        object_type: object_type.to_string(),
                        notes,
                        recorded_at: Utc::now(),
                    },
                );
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ReportEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ReportEntry)> {
        self.entries.iter()
    }

    pub fn count(&self, status: Status) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    /// Created plus Updated
    pub fn successes(&self) -> usize {
        self.entries.values().filter(|e| e.status.is_success()).count()
    }

    /// Fold another report into this one; the other's entries win on conflict
    pub fn merge(&mut self, other: ConversionReport) {
        for (id, entry) in other.entries {
            self.entries.insert(id, entry);
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} skipped, {} failed",
            self.count(Status::Created),
            self.count(Status::Updated),
            self.count(Status::Skipped),
            self.count(Status::Failed),
        )
    }
}
