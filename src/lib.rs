//! Modelport Conversion Engine
//!
//! Bidirectional, best-effort, partial-failure-tolerant conversion between a
//! host authoring document and a portable interchange object graph.
//!
//! ## Features
//!
//! - **Stable Identity**: external identifiers are stamped onto host
//!   elements, so re-running a conversion updates in place instead of
//!   duplicating
//! - **Deferred Resolution**: nodes that reference host elements produced
//!   later in the same batch wait in a queue and retry once their
//!   dependencies resolve
//! - **Upsert Reconciliation**: create, update in place, or recreate on
//!   incompatible kind changes, per object
//! - **Failure Isolation**: one broken object never aborts a batch; the
//!   conversion report is the single source of truth for partial success
//!
//! ## Architecture
//!
//! ```text
//! batch (orchestrator)
//! ├── convert::outbound ── host elements -> interchange nodes
//! ├── convert::inbound ─── interchange nodes -> host elements
//! │   ├── convert::reconcile (upsert)
//! │   └── convert::deferred (dependency queue)
//! ├── identity (external id -> host handles)
//! ├── report (per-object terminal statuses)
//! └── host (in-memory document, transactions, placement)
//! ```

pub mod batch;
pub mod convert;
pub mod error;
pub mod host;
pub mod identity;
pub mod interchange;
pub mod report;
pub mod settings;

pub use batch::{convert_inbound, convert_outbound, BatchOptions, InboundResult};
pub use convert::{CancelFlag, Disposition, Outcome, Session};
pub use error::{ExchangeError, HostError, Result};
pub use host::{
    Category, Document, Element, ElementId, ElementKind, NewElement, Placement, ATTR_EXTERNAL_ID,
};
pub use identity::IdentityIndex;
pub use interchange::{Attachment, ChildLink, Node, NodeBody};
pub use report::{ConversionReport, ReportEntry, Status};
pub use settings::{DetailLevel, Settings};
