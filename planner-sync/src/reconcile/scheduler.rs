//! Debounced write-back timer.
//!
//! Every local document edit re-arms the deadline; only the state at expiry
//! is written. Forced flushes bypass the timer by cancelling it.

use std::time::Duration;
use tokio::time::Instant;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(600);

#[derive(Debug, Clone)]
pub struct WriteBackScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Default for WriteBackScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl WriteBackScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// (Re)start the debounce window from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Completes at `deadline`; never completes when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
