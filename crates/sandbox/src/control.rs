//! Cooperative pause / resume / stop signals for a running execution.
//!
//! The scheduler keeps one [`ExecutionControl`] per running job and hands a
//! clone to the engine. The sandbox observes it at every checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
    stop: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the execution to suspend at its next checkpoint.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Ask the execution to end. Also releases a paused execution.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// A token cancelled by `stop()` that can also be cancelled on its own
    /// (the engine uses this to kill a timed-out run).
    pub fn kill_token(&self) -> CancellationToken {
        self.stop.child_token()
    }
}
