//! Cooperative cancellation for the transfer worker.
//!
//! The worker checks the token once per received chunk; nothing is
//! preempted. Stopping the engine cancels the token and waits for the worker
//! to notice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token shared between the engine and its worker.
///
/// Clones share state: cancelling any clone is observed by all of them.
///
/// # Example
///
/// ```
/// use modelshelf_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
///
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the cancellation state before a new worker run.
    ///
    /// Only call this while no worker is observing the token.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
