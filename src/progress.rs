use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which long-running operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Serial enumeration of category and series directories.
    Enumerate,
    /// Parallel per-series scanning.
    ScanSeries,
    /// Batch matching of external entries.
    Match,
    /// Duplicate detection passes.
    Dedupe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub done: u64,
    /// None while the total is not yet known.
    pub total: Option<u64>,
    /// Short human label for the current item (series name, pair, ...).
    pub label: Option<String>,
}

/// Caller-supplied event sink. Implementations must not block; dropping
/// events is acceptable.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Shared cancellation flag polled between work items. Cancellation yields
/// partial, correctly-typed results; it never corrupts state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every event, for assertions in tests.
    #[derive(Debug, Default)]
    pub struct CollectingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for CollectingSink {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
