//! Core configuration types for the cache warmer.
//!
//! This module contains the `Config` struct and its section types, mirroring
//! the `app.*` / `http.*` / `load.*` / `sitemaps.*` groups of the on-disk
//! TOML file one-for-one.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, deserialized directly from the TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub http: HttpConfig,
    pub load: LoadConfig,
    pub sitemaps: SitemapsConfig,
}

/// `app.*` — daemon-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the embedded state database. Resolved relative to the config
    /// file's directory if relative.
    pub db_path: PathBuf,

    /// Optional path to redirect logs to. Resolved relative to the config
    /// file's directory if relative. When absent, logs go to stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// `error` | `warn` | `info` | `debug` | `trace`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// A URL is considered stale once this many hours have passed since its
    /// last successful warm (subject to the flush marker, see the state
    /// store's `should_warm`).
    #[serde(default = "default_rewarm_after_hours")]
    pub rewarm_after_hours: u64,

    /// When true, `run` repeats indefinitely instead of exiting after one pass.
    #[serde(default = "default_loop_enabled")]
    pub r#loop: bool,

    /// Delay between successive passes when looping.
    #[serde(default = "default_loop_interval_seconds")]
    pub loop_interval_seconds: u64,
}

/// `http.*` — HTTP client, retry, and rate-limiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Starting (and maximum) size of the adaptive concurrency window.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fixed per-request pacing floor applied by every worker after
    /// acquiring a limiter slot, before the load-gate check.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Extra attempts beyond the first for transport/HTTP failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,

    /// Floor for a 429 cooldown when no (or an unparseable) `Retry-After`
    /// header is present, and the minimum bound even when one is.
    #[serde(default = "default_rate_limit_cooldown_seconds")]
    pub rate_limit_cooldown_seconds: u64,

    /// Consecutive successful warms required, at the current concurrency
    /// cap, before the cap is allowed to climb by one.
    #[serde(default = "default_rate_limit_recover_after")]
    pub rate_limit_recover_after: u32,

    /// Upper bound on the number of times a single URL may restart its
    /// retry loop in response to repeated 429s before it is recorded as
    /// failed and abandoned for this pass.
    #[serde(default = "default_rate_limit_max_429_retries")]
    pub rate_limit_max_429_retries: u32,
}

/// `load.*` — host load-average gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_max_load")]
    pub max_load: f64,

    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
}

/// `sitemaps.*` — seed URLs the collector starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_rewarm_after_hours() -> u64 {
    24
}
fn default_loop_enabled() -> bool {
    false
}
fn default_loop_interval_seconds() -> u64 {
    3600
}
fn default_user_agent() -> String {
    "cachewarm/0.1".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_connect_timeout_seconds() -> u64 {
    10
}
fn default_max_redirects() -> usize {
    5
}
fn default_concurrency() -> usize {
    8
}
fn default_min_delay_ms() -> u64 {
    0
}
fn default_retries() -> u32 {
    2
}
fn default_retry_backoff_seconds() -> u64 {
    1
}
fn default_rate_limit_cooldown_seconds() -> u64 {
    5
}
fn default_rate_limit_recover_after() -> u32 {
    50
}
fn default_rate_limit_max_429_retries() -> u32 {
    10
}
fn default_max_load() -> f64 {
    4.0
}
fn default_check_interval_seconds() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                db_path: PathBuf::from("cachewarm.db"),
                log_file: None,
                log_level: default_log_level(),
                rewarm_after_hours: default_rewarm_after_hours(),
                r#loop: default_loop_enabled(),
                loop_interval_seconds: default_loop_interval_seconds(),
            },
            http: HttpConfig {
                user_agent: default_user_agent(),
                timeout_seconds: default_timeout_seconds(),
                connect_timeout_seconds: default_connect_timeout_seconds(),
                max_redirects: default_max_redirects(),
                concurrency: default_concurrency(),
                min_delay_ms: default_min_delay_ms(),
                retries: default_retries(),
                retry_backoff_seconds: default_retry_backoff_seconds(),
                rate_limit_cooldown_seconds: default_rate_limit_cooldown_seconds(),
                rate_limit_recover_after: default_rate_limit_recover_after(),
                rate_limit_max_429_retries: default_rate_limit_max_429_retries(),
            },
            load: LoadConfig {
                max_load: default_max_load(),
                check_interval_seconds: default_check_interval_seconds(),
            },
            sitemaps: SitemapsConfig { urls: Vec::new() },
        }
    }
}
