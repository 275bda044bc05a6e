//! Window-based request pacing
//!
//! Each request takes one permit and holds it for the length of the window, so
//! at most `max_requests` requests start within any window.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Request pacer shared by every worker of a run
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allow at most `max_requests` request starts per `window`
    pub fn per_window(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_requests)),
            max_requests,
            window,
        }
    }

    /// Convenience constructor for a per-minute budget
    pub fn per_minute(max_requests: usize) -> Self {
        Self::per_window(max_requests, Duration::from_secs(60))
    }

    /// Configured budget per window
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit; the permit is released once the window elapses.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire permits
    #[error("failed to acquire rate limit permit: {0}")]
    AcquireError(String),
}
