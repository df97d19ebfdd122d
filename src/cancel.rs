//! A single cooperative cancellation token shared by every suspension point
//! in the warming pipeline (limiter acquire, load-gate sleep, retry/cooldown
//! backoff, inter-run sleep). Fired once by the signal handlers installed in
//! [`crate::orchestrator`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::time::Duration;

/// Cheaply cloneable; every clone observes the same cancellation.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Idempotent. Wakes every task currently awaiting [`Self::cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once cancellation fires. Safe to await repeatedly and from
    /// multiple tasks.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleeps for `duration` unless cancelled first, in which case returns
    /// `Err(Cancelled)` early.
    pub async fn sleep_or_cancel(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancelled() => Err(Cancelled),
        }
    }
}

/// Sentinel indicating a cancellation interrupted an otherwise fallible
/// operation. Not an error in the usual sense — the orchestrator treats it
/// as a clean, non-error shutdown path (see error handling design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_pending_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake promptly")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_err_on_cancel() {
        let token = CancelToken::new();
        token.cancel();
        let result = token.sleep_or_cancel(Duration::from_secs(10)).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn sleep_or_cancel_completes_normally() {
        let token = CancelToken::new();
        let result = token.sleep_or_cancel(Duration::from_millis(1)).await;
        assert_eq!(result, Ok(()));
    }
}
