//! Recursive sitemap resolution: seeds -> de-duplicated page URL set.
//!
//! The visited-sitemap set is shared across all seeds in a single run (to
//! prevent cycles when two seeds reference the same child, or a child
//! references an ancestor) but the collector itself runs one seed at a time,
//! so a plain mutex is sufficient (see the concurrency model's note that an
//! arena/indexed representation is unnecessary here).

use std::collections::HashSet;
use std::sync::Mutex;

use log::{debug, info};

use crate::cancel::CancelToken;
use crate::config::{HttpConfig, LoadConfig};
use crate::sitemap::{fetcher, parser};
use crate::store::Store;

/// Shared, mutex-protected record of sitemap URLs already visited in the
/// current run.
pub struct VisitedSet {
    seen: Mutex<HashSet<String>>,
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitedSet {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns true if `url` was not previously present (i.e. this call
    /// performed the insertion).
    fn insert_if_new(&self, url: &str) -> bool {
        let mut seen = self.seen.lock().expect("visited set mutex poisoned");
        seen.insert(url.to_string())
    }
}

/// Recursively resolves `seed` (and any nested sitemaps it references) into
/// a de-duplicated list of page URLs. Visitation is tracked through
/// `visited` so cycles across seeds or nested sitemaps terminate.
#[allow(clippy::too_many_arguments)]
pub async fn collect(
    seed: &str,
    client: &reqwest::Client,
    http_cfg: &HttpConfig,
    load_cfg: &LoadConfig,
    store: &Store,
    visited: &VisitedSet,
    cancel: &CancelToken,
) -> Vec<String> {
    if !visited.insert_if_new(seed) {
        debug!("sitemap {seed} already visited this run, skipping");
        return Vec::new();
    }

    let bytes = match fetcher::fetch(client, seed, http_cfg, load_cfg, cancel).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(store_err) = store.mark_sitemap(seed, &e).await {
                log::error!("failed to record sitemap fetch failure for {seed}: {store_err:#}");
            }
            return Vec::new();
        }
    };

    if let Err(store_err) = store.mark_sitemap(seed, "").await {
        log::error!("failed to record sitemap fetch success for {seed}: {store_err:#}");
    }

    let parsed = parser::parse(&bytes);
    info!(
        "sitemap {seed}: {} pages, {} child sitemaps",
        parsed.pages.len(),
        parsed.children.len()
    );

    let mut pages = parsed.pages;
    for child in &parsed.children {
        if cancel.is_cancelled() {
            break;
        }
        let child_pages =
            Box::pin(collect(child, client, http_cfg, load_cfg, store, visited, cancel)).await;
        pages.extend(child_pages);
    }

    pages.sort();
    pages.dedup();
    pages
}
