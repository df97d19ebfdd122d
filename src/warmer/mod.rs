//! Warming worker pool: drives individual URLs through the rate limiter,
//! performs GET-to-completion, and records the outcome.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::HttpConfig;
use crate::http::parse_retry_after;
use crate::limiter::RateLimiter;
use crate::load_gate::wait_for_load;
use crate::store::Store;

/// Drives `urls` through the limiter concurrently and waits for every
/// worker to finish. Each worker is entirely self-contained: it acquires
/// its own slot, retries its own requests, and records its own outcome.
pub async fn warm_all(
    urls: Vec<String>,
    client: &reqwest::Client,
    http_cfg: &HttpConfig,
    load_cfg: &crate::config::LoadConfig,
    limiter: &RateLimiter,
    store: &Store,
    cancel: &CancelToken,
) {
    let mut tasks = FuturesUnordered::new();
    for url in urls {
        tasks.push(warm_one(url, client, http_cfg, load_cfg, limiter, store, cancel));
    }
    while tasks.next().await.is_some() {}
}

/// Single-URL worker lifecycle, matching the five-step contract: acquire,
/// pace, load-gate, retry-with-429-handling, release.
#[allow(clippy::too_many_arguments)]
async fn warm_one(
    url: String,
    client: &reqwest::Client,
    http_cfg: &HttpConfig,
    load_cfg: &crate::config::LoadConfig,
    limiter: &RateLimiter,
    store: &Store,
    cancel: &CancelToken,
) {
    if limiter.acquire(cancel).await.is_err() {
        debug!("cancelled while acquiring limiter slot for {url}; not recording an outcome");
        return;
    }
    let mut holds_slot = true;

    if cancel
        .sleep_or_cancel(Duration::from_millis(http_cfg.min_delay_ms))
        .await
        .is_err()
    {
        record_cancelled(store, &url).await;
        if holds_slot {
            limiter.release().await;
        }
        return;
    }

    if wait_for_load(load_cfg, cancel).await.is_err() {
        record_cancelled(store, &url).await;
        if holds_slot {
            limiter.release().await;
        }
        return;
    }

    let mut attempt: u32 = 1;
    let mut retries_on_429: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            record_cancelled(store, &url).await;
            break;
        }

        match client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();

                if status.as_u16() == 429 {
                    retries_on_429 += 1;
                    if retries_on_429 > http_cfg.rate_limit_max_429_retries {
                        warn!("{url}: exceeded max 429 retries ({})", http_cfg.rate_limit_max_429_retries);
                        record_outcome(store, &url, 429, "max 429 retries exceeded").await;
                        break;
                    }

                    let retry_after = parse_retry_after(
                        response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok()),
                    );
                    limiter.on_429(retry_after).await;
                    limiter.release().await;
                    holds_slot = false;

                    let cooldown =
                        retry_after.unwrap_or(Duration::from_secs(http_cfg.rate_limit_cooldown_seconds));
                    if cancel.sleep_or_cancel(cooldown).await.is_err() {
                        // Cancelled while cooling down, before re-acquiring: still
                        // in the acquire phase, so no outcome is recorded.
                        return;
                    }
                    if limiter.acquire(cancel).await.is_err() {
                        return;
                    }
                    holds_slot = true;
                    attempt = 1;
                    continue;
                }

                if status.as_u16() >= 400 {
                    if attempt <= http_cfg.retries {
                        backoff(cancel, attempt, http_cfg.retry_backoff_seconds).await;
                        attempt += 1;
                        continue;
                    }
                    record_outcome(store, &url, status.as_u16() as i64, &format!("HTTP {status}")).await;
                    break;
                }

                // 2xx/3xx: drain the body to completion so intermediate
                // caches actually populate, then record success.
                match drain_body(response).await {
                    Ok(()) => {
                        limiter.on_success().await;
                        record_outcome(store, &url, status.as_u16() as i64, "").await;
                        break;
                    }
                    Err(e) => {
                        if attempt <= http_cfg.retries {
                            warn!("{url}: error draining response body: {e}");
                            backoff(cancel, attempt, http_cfg.retry_backoff_seconds).await;
                            attempt += 1;
                            continue;
                        }
                        record_outcome(store, &url, 0, &e).await;
                        break;
                    }
                }
            }
            Err(e) => {
                if attempt <= http_cfg.retries {
                    backoff(cancel, attempt, http_cfg.retry_backoff_seconds).await;
                    attempt += 1;
                    continue;
                }
                record_outcome(store, &url, 0, &format!("transport error: {e}")).await;
                break;
            }
        }
    }

    if holds_slot {
        limiter.release().await;
    }
}

async fn drain_body(response: reqwest::Response) -> Result<(), String> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        chunk.map_err(|e| format!("body read error: {e}"))?;
    }
    Ok(())
}

async fn backoff(cancel: &CancelToken, attempt: u32, retry_backoff_seconds: u64) {
    let delay = Duration::from_secs(u64::from(attempt) * retry_backoff_seconds);
    let _ = cancel.sleep_or_cancel(delay).await;
}

async fn record_outcome(store: &Store, url: &str, status: i64, error_msg: &str) {
    if let Err(e) = store.mark_warmed(url, status, error_msg).await {
        log::error!("failed to record warm outcome for {url}: {e:#}");
    } else {
        info!("warmed {url}: status={status} error={error_msg:?}");
    }
}

async fn record_cancelled(store: &Store, url: &str) {
    record_outcome(store, url, 0, "cancelled").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadConfig;

    fn http_cfg(overrides: impl FnOnce(&mut HttpConfig)) -> HttpConfig {
        let mut cfg = HttpConfig {
            user_agent: "test".into(),
            timeout_seconds: 5,
            connect_timeout_seconds: 5,
            max_redirects: 3,
            concurrency: 4,
            min_delay_ms: 0,
            retries: 1,
            retry_backoff_seconds: 0,
            rate_limit_cooldown_seconds: 1,
            rate_limit_recover_after: 50,
            rate_limit_max_429_retries: 3,
        };
        overrides(&mut cfg);
        cfg
    }

    fn load_cfg() -> LoadConfig {
        LoadConfig {
            max_load: f64::MAX,
            check_interval_seconds: 0,
        }
    }

    #[tokio::test]
    async fn successful_get_records_200_and_resets_streak() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/a").with_status(200).with_body("ok").create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("s.db")).await.unwrap();
        let client = reqwest::Client::new();
        let cfg = http_cfg(|_| {});
        let limiter = RateLimiter::new(cfg.concurrency, cfg.rate_limit_recover_after, cfg.rate_limit_cooldown_seconds);
        let cancel = CancelToken::new();

        let url = format!("{}/a", server.url());
        warm_one(url.clone(), &client, &cfg, &load_cfg(), &limiter, &store, &cancel).await;

        let recent = store.recent_warmed(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].last_status, 200);
        assert_eq!(recent[0].last_error, "");
    }

    #[tokio::test]
    async fn persistent_404_is_recorded_after_retries_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/missing").with_status(404).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("s.db")).await.unwrap();
        let client = reqwest::Client::new();
        let cfg = http_cfg(|c| c.retries = 1);
        let limiter = RateLimiter::new(cfg.concurrency, cfg.rate_limit_recover_after, cfg.rate_limit_cooldown_seconds);
        let cancel = CancelToken::new();

        let url = format!("{}/missing", server.url());
        warm_one(url, &client, &cfg, &load_cfg(), &limiter, &store, &cancel).await;

        let failed = store.failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_status, 404);
    }

    #[tokio::test]
    async fn sustained_429_halves_concurrency_and_eventually_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/throttled")
            .with_status(429)
            .with_header("Retry-After", "0")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("s.db")).await.unwrap();
        let client = reqwest::Client::new();
        let cfg = http_cfg(|c| {
            c.concurrency = 8;
            c.rate_limit_cooldown_seconds = 0;
            c.rate_limit_max_429_retries = 2;
        });
        let limiter = RateLimiter::new(cfg.concurrency, cfg.rate_limit_recover_after, cfg.rate_limit_cooldown_seconds);
        let cancel = CancelToken::new();

        let url = format!("{}/throttled", server.url());
        warm_one(url, &client, &cfg, &load_cfg(), &limiter, &store, &cancel).await;

        assert_eq!(limiter.current_concurrency().await, 2, "two halvings from 8 before the retry cap trips");
        let recent = store.recent_warmed(10).await.unwrap();
        assert_eq!(recent[0].last_status, 429);
        assert_eq!(recent[0].last_error, "max 429 retries exceeded");
    }
}
