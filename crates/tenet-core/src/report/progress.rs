//! Completion-order progress for a scenario run. The runner emits one event
//! per finished case; the console layer decides what to print.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
}

/// Called once per finished or cancelled case. May throttle.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
