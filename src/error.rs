//! Error types for the conversion engine

use thiserror::Error;

use crate::host::ElementId;
use crate::report::ConversionReport;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Batch-level errors
///
/// Per-object problems never surface here; they are downgraded to report
/// entries at the dispatcher/reconciler boundary. Only batch-wide conditions
/// (nothing converted, user cancellation) terminate a batch.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("there are zero objects to send; use a filter or set a selection")]
    EmptySelection,

    #[error("zero objects converted successfully; batch stopped")]
    NothingConverted,

    #[error("batch cancelled by user after {} of {total} objects", report.len())]
    Cancelled {
        report: ConversionReport,
        total: usize,
    },

    #[error("host document error: {0}")]
    Host(#[from] HostError),

    #[error("configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the host document's mutation API
#[derive(Error, Debug)]
pub enum HostError {
    #[error("element not found: {0}")]
    NotFound(ElementId),

    #[error("host element not found: {0}")]
    HostNotFound(ElementId),

    #[error("no face available on host element {0}")]
    NoFaceOnHost(ElementId),

    #[error("element {0} is not a level")]
    NotALevel(ElementId),

    #[error("no placement strategy succeeded for '{name}': {reason}")]
    PlacementExhausted { name: String, reason: String },
}
