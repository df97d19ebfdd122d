//! Overall lifecycle: one-shot and looped run control, the staleness
//! filter, and signal-driven shutdown.

use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::sitemap::{self, VisitedSet};
use crate::store::Store;
use crate::warmer;

pub struct Orchestrator {
    config: Config,
    store: Store,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl Orchestrator {
    pub async fn new(config: Config) -> Result<Self> {
        let store = Store::open(&config.app.db_path)
            .await
            .context("failed to open state store")?;
        let client = crate::http::build_client(&config.http).context("failed to build HTTP client")?;
        let limiter = RateLimiter::new(
            config.http.concurrency,
            config.http.rate_limit_recover_after,
            config.http.rate_limit_cooldown_seconds,
        );
        Ok(Self {
            config,
            store,
            client,
            limiter,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// One pass: resolve sitemaps, filter by staleness, warm survivors.
    pub async fn run_once(&self, cancel: &CancelToken) -> Result<()> {
        let visited = VisitedSet::new();
        let mut pages = Vec::new();

        for seed in &self.config.sitemaps.urls {
            if cancel.is_cancelled() {
                break;
            }
            let seed_pages = sitemap::collect(
                seed,
                &self.client,
                &self.config.http,
                &self.config.load,
                &self.store,
                &visited,
                cancel,
            )
            .await;
            pages.extend(seed_pages);
        }
        pages.sort();
        pages.dedup();

        let rewarm_interval = chrono::Duration::hours(self.config.app.rewarm_after_hours as i64);
        let mut stale = Vec::with_capacity(pages.len());
        for url in pages {
            match self.store.should_warm(&url, rewarm_interval).await {
                Ok(true) => stale.push(url),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("staleness check failed for {url}, warming anyway: {e:#}");
                    stale.push(url);
                }
            }
        }

        info!("run_once: warming {} of the discovered urls", stale.len());
        warmer::warm_all(
            stale,
            &self.client,
            &self.config.http,
            &self.config.load,
            &self.limiter,
            &self.store,
            cancel,
        )
        .await;

        Ok(())
    }

    /// Runs [`Self::run_once`] repeatedly, sleeping `app.loop_interval_seconds`
    /// between passes, until `app.loop` is false or cancellation fires.
    pub async fn run_loop(&self, cancel: &CancelToken) -> Result<()> {
        loop {
            self.run_once(cancel).await?;

            if !self.config.app.r#loop || cancel.is_cancelled() {
                return Ok(());
            }

            if cancel
                .sleep_or_cancel(Duration::from_secs(self.config.app.loop_interval_seconds))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

/// Installs SIGINT/SIGTERM handlers (Unix) that cancel `token` exactly once.
/// On other platforms, falls back to `Ctrl+C` only.
pub fn install_signal_handlers(token: CancelToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to install SIGINT handler: {e}");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            token.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, shutting down");
                token.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(db_path: std::path::PathBuf) -> Config {
        let mut config = Config::default();
        config.app.db_path = db_path;
        config.http.retries = 0;
        config
    }

    #[tokio::test]
    async fn run_once_with_no_seeds_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(dir.path().join("s.db"))).await.unwrap();
        let cancel = CancelToken::new();
        orchestrator.run_once(&cancel).await.unwrap();
        let stats = orchestrator.store().stats().await.unwrap();
        assert_eq!(stats.warmed_total, 0);
    }

    #[tokio::test]
    async fn basic_warm_scenario_warms_both_urls_successfully() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _sitemap = server
            .mock("GET", "/sitemap.xml")
            .with_status(200)
            .with_body(format!(
                r#"<urlset><url><loc>{base}/a</loc></url><url><loc>{base}/b</loc></url></urlset>"#
            ))
            .create_async()
            .await;
        let _a = server.mock("GET", "/a").with_status(200).create_async().await;
        let _b = server.mock("GET", "/b").with_status(200).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("s.db"));
        config.sitemaps.urls = vec![format!("{base}/sitemap.xml")];

        let orchestrator = Orchestrator::new(config).await.unwrap();
        let cancel = CancelToken::new();
        orchestrator.run_once(&cancel).await.unwrap();

        let stats = orchestrator.store().stats().await.unwrap();
        assert_eq!(stats.warmed_total, 2);
        assert_eq!(stats.ok_total, 2);
        assert_eq!(stats.err_total, 0);
    }

    #[tokio::test]
    async fn flush_forces_rewarm_within_interval() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _sitemap = server
            .mock("GET", "/sitemap.xml")
            .with_status(200)
            .with_body(format!(r#"<urlset><url><loc>{base}/a</loc></url></urlset>"#))
            .create_async()
            .await;
        let _a = server.mock("GET", "/a").with_status(200).expect(2).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("s.db"));
        config.sitemaps.urls = vec![format!("{base}/sitemap.xml")];
        config.app.rewarm_after_hours = 999;

        let orchestrator = Orchestrator::new(config).await.unwrap();
        let cancel = CancelToken::new();
        orchestrator.run_once(&cancel).await.unwrap();
        orchestrator.store().mark_flush(Some("test")).await.unwrap();
        orchestrator.run_once(&cancel).await.unwrap();

        let recent = orchestrator.store().recent_warmed(10).await.unwrap();
        assert_eq!(recent[0].warmed_count, 2);
    }
}
