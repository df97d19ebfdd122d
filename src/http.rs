//! Shared HTTP client construction, used by both the sitemap collector and
//! the warming worker pool so the two speak with one consistent
//! `User-Agent`, timeout, and redirect policy.

use std::time::Duration;

use crate::config::HttpConfig;

pub fn build_client(cfg: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
        .redirect(reqwest::redirect::Policy::limited(cfg.max_redirects))
        .build()
}

/// Parses a `Retry-After` header value: either a decimal-seconds integer or
/// an RFC 1123 HTTP-date. Returns `None` if absent, unparseable, or would
/// resolve to a non-positive duration.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let value = value?.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return if secs > 0 {
            Some(Duration::from_secs(secs as u64))
        } else {
            None
        };
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let now = chrono::Utc::now();
    let delta = date.with_timezone(&chrono::Utc) - now;
    delta.to_std().ok()
}
