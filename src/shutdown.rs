//! Cooperative cancellation shared by the orchestrator, workers and backoff sleeps.
//!
//! A [`ShutdownCoordinator`] is tripped either by the operator (Ctrl+C) or by the
//! run itself when it must abort (authentication failure, failure-rate ceiling).
//! The first reason recorded wins, which lets the orchestrator tell a resumable
//! pause from an abort after the fact.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Why a shutdown was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// External interrupt; the run stops resumably
    Interrupt,
    /// The run decided to abort
    Abort(String),
}

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    reason: OnceCell<ShutdownReason>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            reason: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request an operator shutdown (pause).
    pub fn request_shutdown(&self) {
        self.trigger(ShutdownReason::Interrupt);
    }

    /// Request an abort with a human-readable cause.
    pub fn request_abort(&self, cause: impl Into<String>) {
        self.trigger(ShutdownReason::Abort(cause.into()));
    }

    fn trigger(&self, reason: ShutdownReason) {
        let _ = self.reason.set(reason);
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// The first recorded reason, if shutdown was requested.
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a concurrent trigger
        // between the check and the await cannot be missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
