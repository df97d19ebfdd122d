//! Retry-wrapped HTTP GET for sitemap payloads, with transparent gzip
//! decompression for `.gz`-suffixed URLs.
//!
//! Deliberately does not consult the adaptive rate limiter: sitemap traffic
//! is a handful of requests per run and is treated as exempt from admission
//! control (see the design notes on this tradeoff).

use std::io::Read;

use log::warn;
use tokio::time::Duration;

use crate::cancel::CancelToken;
use crate::config::HttpConfig;
use crate::load_gate::wait_for_load;

/// Fetches `url`, retrying transport errors and HTTP status >= 400 up to
/// `cfg.retries + 1` total attempts. Returns the final body bytes, gzip
/// -decoded if `url`'s path ends in `.gz` (case-insensitive).
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    cfg: &HttpConfig,
    load_cfg: &crate::config::LoadConfig,
    cancel: &CancelToken,
) -> Result<Vec<u8>, String> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=(cfg.retries + 1) {
        if wait_for_load(load_cfg, cancel).await.is_err() {
            return Err("cancelled while waiting on load gate".to_string());
        }
        if cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }

        match try_fetch_once(client, url).await {
            Ok(bytes) => {
                if is_gzip_url(url) {
                    match decompress_gzip(&bytes) {
                        Ok(decoded) => return Ok(decoded),
                        Err(e) => {
                            last_error = format!("gzip decompression failed: {e}");
                        }
                    }
                } else {
                    return Ok(bytes);
                }
            }
            Err(e) => {
                last_error = e;
            }
        }

        warn!("sitemap fetch attempt {attempt} for {url} failed: {last_error}");
        if attempt <= cfg.retries {
            let backoff = Duration::from_secs(attempt as u64 * cfg.retry_backoff_seconds);
            if cancel.sleep_or_cancel(backoff).await.is_err() {
                return Err("cancelled during retry backoff".to_string());
            }
        }
    }

    Err(last_error)
}

async fn try_fetch_once(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("transport error: {e}"))?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(format!("HTTP {status}"));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("read error: {e}"))
}

fn is_gzip_url(url: &str) -> bool {
    url.to_ascii_lowercase().ends_with(".gz")
}

fn decompress_gzip(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
