//! Adaptive-concurrency admission control: a semaphore whose capacity
//! shrinks multiplicatively on HTTP 429 and recovers additively after a
//! streak of successes.
//!
//! All bookkeeping lives behind one `tokio::sync::Mutex`; a `Notify` stands
//! in for the condition variable described in the design notes — every
//! state change that could admit a waiter (`release`, `on_429`,
//! `on_success`) broadcasts via `notify_waiters`. Contention is expected to
//! be low (bounded by `concurrency`), so a single lock is preferable here to
//! a lock-free design.

use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::{Mutex, Notify};

use crate::cancel::{CancelToken, Cancelled};

const MIN_CONCURRENCY: usize = 1;

struct State {
    current_concurrency: usize,
    max_concurrency: usize,
    active_workers: usize,
    cooldown_until: Option<Instant>,
    consecutive_ok: u32,
    recover_after: u32,
    cooldown_seconds: u64,
}

/// Shared admission gate for the warming worker pool.
pub struct RateLimiter {
    state: Mutex<State>,
    notify: Notify,
}

impl RateLimiter {
    pub fn new(concurrency: usize, recover_after: u32, cooldown_seconds: u64) -> Self {
        Self {
            state: Mutex::new(State {
                current_concurrency: concurrency.max(MIN_CONCURRENCY),
                max_concurrency: concurrency.max(MIN_CONCURRENCY),
                active_workers: 0,
                cooldown_until: None,
                consecutive_ok: 0,
                recover_after,
                cooldown_seconds,
            }),
            notify: Notify::new(),
        }
    }

    /// Blocks until a slot is available and the cooldown (if any) has
    /// elapsed, then admits the caller. Cancellation-responsive even while
    /// sleeping out a cooldown.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            // Register interest before checking, so a concurrent
            // notify_waiters() between our check and the await is never
            // lost (the standard tokio::sync::Notify pattern).
            let notified = self.notify.notified();

            let wait_until = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let cooling_down = state.cooldown_until.is_some_and(|t| now < t);
                if !cooling_down && state.active_workers < state.current_concurrency {
                    state.active_workers += 1;
                    return Ok(());
                }
                state.cooldown_until
            };

            match wait_until {
                Some(until) => {
                    tokio::select! {
                        () = notified => {},
                        () = tokio::time::sleep_until(until.into()) => {},
                        () = cancel.cancelled() => return Err(Cancelled),
                    }
                }
                None => {
                    tokio::select! {
                        () = notified => {},
                        () = cancel.cancelled() => return Err(Cancelled),
                    }
                }
            }
        }
    }

    /// Releases a previously acquired slot.
    pub async fn release(&self) {
        {
            let mut state = self.state.lock().await;
            state.active_workers = state.active_workers.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Halves the concurrency cap (floored at [`MIN_CONCURRENCY`]), resets
    /// the success streak, and opens a cooldown window of
    /// `max(retry_after_hint, cooldown_seconds)`.
    pub async fn on_429(&self, retry_after_hint: Option<Duration>) {
        {
            let mut state = self.state.lock().await;
            let halved = (state.current_concurrency / 2).max(MIN_CONCURRENCY);
            state.current_concurrency = halved;
            state.consecutive_ok = 0;
            let floor = Duration::from_secs(state.cooldown_seconds);
            let cooldown = retry_after_hint.unwrap_or(Duration::ZERO).max(floor);
            state.cooldown_until = Some(Instant::now() + cooldown);
            warn!(
                "rate limiter: 429 received, concurrency cap halved to {halved}, cooldown {cooldown:?}"
            );
        }
        self.notify.notify_waiters();
    }

    /// Records a successful warm; climbs the cap by one once
    /// `recover_after` consecutive successes have accrued at the current cap.
    pub async fn on_success(&self) {
        let recovered_to = {
            let mut state = self.state.lock().await;
            state.consecutive_ok += 1;
            if state.consecutive_ok >= state.recover_after
                && state.current_concurrency < state.max_concurrency
            {
                state.current_concurrency += 1;
                state.consecutive_ok = 0;
                Some(state.current_concurrency)
            } else {
                None
            }
        };
        if let Some(cap) = recovered_to {
            info!("rate limiter: recovered, concurrency cap now {cap}");
        }
        self.notify.notify_waiters();
    }

    /// Current admission cap, for status reporting and tests.
    pub async fn current_concurrency(&self) -> usize {
        self.state.lock().await.current_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_admits_up_to_current_concurrency() {
        let limiter = RateLimiter::new(2, 100, 1);
        let cancel = CancelToken::new();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        let limiter_ref = &limiter;
        let cancel_ref = &cancel;
        let third = tokio::time::timeout(Duration::from_millis(50), async move {
            limiter_ref.acquire(cancel_ref).await
        })
        .await;
        assert!(third.is_err(), "third acquire should block while at cap");
    }

    #[tokio::test]
    async fn release_wakes_a_blocked_acquirer() {
        let cancel = CancelToken::new();
        let limiter = std::sync::Arc::new(RateLimiter::new(1, 100, 1));
        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.release().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted after release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn on_429_halves_concurrency_and_floors_at_min() {
        let limiter = RateLimiter::new(3, 100, 0);
        limiter.on_429(None).await;
        assert_eq!(limiter.current_concurrency().await, 1);
        limiter.on_429(None).await;
        assert_eq!(limiter.current_concurrency().await, 1, "never drops below min_concurrency");
    }

    #[tokio::test]
    async fn cooldown_is_max_of_retry_after_and_floor() {
        let limiter = RateLimiter::new(8, 100, 5);
        let before = Instant::now();
        limiter.on_429(Some(Duration::from_secs(3))).await;
        let elapsed_floor = {
            let state = limiter.state.lock().await;
            state.cooldown_until.unwrap().duration_since(before)
        };
        assert!(elapsed_floor >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recovery_is_additive_after_sustained_success() {
        let limiter = RateLimiter::new(8, 3, 1);
        limiter.on_429(None).await;
        assert_eq!(limiter.current_concurrency().await, 4);

        for _ in 0..3 {
            limiter.on_success().await;
        }
        assert_eq!(limiter.current_concurrency().await, 5);
    }

    #[tokio::test]
    async fn consecutive_ok_resets_on_429() {
        let limiter = RateLimiter::new(8, 5, 0);
        limiter.on_success().await;
        limiter.on_success().await;
        limiter.on_429(None).await;
        let consecutive = limiter.state.lock().await.consecutive_ok;
        assert_eq!(consecutive, 0);
    }
}
