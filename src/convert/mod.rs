//! Conversion engine
//!
//! Type dispatch per direction, the per-batch session context, and the
//! reconciliation machinery. All converter state lives on [`Session`],
//! constructed fresh per batch and dropped at batch end; nothing is
//! process-global.

pub mod deferred;
pub mod inbound;
pub mod outbound;
pub mod reconcile;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::identity::IdentityIndex;
use crate::report::{ConversionReport, Status};
use crate::settings::Settings;
use deferred::DeferredQueue;
use indexmap::IndexMap;

use crate::host::ElementId;

/// Three-state result of one dispatch, returned by value
#[derive(Debug)]
pub enum Outcome<T> {
    Converted(T),
    Skipped(String),
    Failed(String),
}

/// Whether an upsert created a fresh element or mutated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created,
    Updated,
}

impl Disposition {
    pub fn status(self) -> Status {
        match self {
            Disposition::Created => Status::Created,
            Disposition::Updated => Status::Updated,
        }
    }
}

/// Shared cooperative cancellation flag, polled once per batch item
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Rate-limited yield to the host's UI/message loop.
///
/// Not concurrency: the hook runs inline on the conversion thread, at most
/// once per interval, and must not re-enter the conversion logic.
pub struct UiYield {
    hook: Option<Box<dyn FnMut()>>,
    interval: Duration,
    last: Option<Instant>,
}

impl UiYield {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(150);

    pub fn new(hook: Option<Box<dyn FnMut()>>, interval: Duration) -> Self {
        Self {
            hook,
            interval,
            last: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Self::DEFAULT_INTERVAL)
    }

    pub fn tick(&mut self) {
        let Some(hook) = self.hook.as_mut() else {
            return;
        };
        let due = match self.last {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        };
        if due {
            hook();
            self.last = Some(Instant::now());
        }
    }
}

/// Per-batch conversion context
///
/// Owns the identity index, the deferred queue, the running report, and the
/// produced-handles map. Reset means: build a new one.
pub struct Session<'a> {
    pub settings: &'a Settings,
    pub index: IdentityIndex,
    pub deferred: DeferredQueue,
    pub report: ConversionReport,
    /// Inbound: handles produced per report key
    pub produced: IndexMap<String, Vec<ElementId>>,
    pub cancel: CancelFlag,
    /// Bounded wait for dependency elements to settle into the index
    pub settle_timeout: Duration,
    pub settle_poll: Duration,
}

impl<'a> Session<'a> {
    pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_SETTLE_POLL: Duration = Duration::from_millis(50);

    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            index: IdentityIndex::new(),
            deferred: DeferredQueue::new(),
            report: ConversionReport::new(),
            produced: IndexMap::new(),
            cancel: CancelFlag::new(),
            settle_timeout: Self::DEFAULT_SETTLE_TIMEOUT,
            settle_poll: Self::DEFAULT_SETTLE_POLL,
        }
    }
}
