//! Shutdown coordination for the persist path.
//!
//! Once shutdown is initiated no new persists are queued; the manager drains
//! what is already queued and flushes the rest itself before marking the
//! shutdown complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown flags.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Set once no new persists may be queued
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once the final flush has finished
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Stops new persists from being queued. Returns `false` if shutdown was
    /// already under way.
    pub fn initiate_shutdown(&self) -> bool {
        let first = !self.shutdown_initiated.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Shutdown initiated - no new persists will be queued");
        }
        first
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ User data flushed - ready for final cleanup");
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_progress_once() {
        let state = ShutdownState::new();
        assert!(!state.is_shutdown_initiated());
        assert!(state.initiate_shutdown());
        assert!(!state.initiate_shutdown());
        assert!(state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());
        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }

    #[test]
    fn clones_share_flags() {
        let state = ShutdownState::new();
        let other = state.clone();
        state.initiate_shutdown();
        assert!(other.is_shutdown_initiated());
    }
}
