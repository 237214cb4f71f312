//! Cancellation and deadlines for tree operations
//!
//! One [`OperationContext`] is threaded through an entire apply or delete.
//! Cancelling it stops the operation at the next executor call or chart
//! boundary; objects that were already applied stay applied.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{KubeError, Result};

#[derive(Debug, Default)]
struct Signal {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// A context that never expires on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            signal: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derived context sharing this token, with a deadline no later than ours
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let requested = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, requested) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            signal: Arc::clone(&self.signal),
            deadline,
        }
    }

    /// Signal cancellation to this context and every context sharing it
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::Release);
        self.signal.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the context is already done
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KubeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once `cancel` is called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.signal.notify.notified();
            if self.signal.cancelled.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut` until it finishes, the token fires or the deadline passes
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                result = fut => result,
                _ = self.cancelled() => Err(KubeError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(KubeError::Cancelled),
            },
            None => tokio::select! {
                result = fut => result,
                _ = self.cancelled() => Err(KubeError::Cancelled),
            },
        }
    }
}
