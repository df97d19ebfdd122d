//! Embedded state store: per-URL warm history, per-sitemap visit log, and
//! global metadata, backed by a single SQLite file.
//!
//! Matches the data model's three relations (`WarmedURL`, `SitemapRecord`,
//! `Meta`). All writes are serialized internally by SQLite's WAL-mode
//! single-writer semantics plus a bounded connection pool; callers may issue
//! operations concurrently without external locking.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS warmed_urls (
    url TEXT PRIMARY KEY,
    last_warmed_utc TEXT NOT NULL,
    last_status INTEGER NOT NULL,
    last_error TEXT NOT NULL DEFAULT '',
    warmed_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_warmed_urls_last_warmed ON warmed_urls(last_warmed_utc);
CREATE INDEX IF NOT EXISTS idx_warmed_urls_last_status ON warmed_urls(last_status);

CREATE TABLE IF NOT EXISTS sitemap_records (
    sitemap_url TEXT PRIMARY KEY,
    last_fetched_utc TEXT NOT NULL,
    last_error TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_sitemap_records_fetched ON sitemap_records(last_fetched_utc);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const KEY_LAST_FLUSH_UTC: &str = "last_flush_utc";
const KEY_LAST_FLUSH_REASON: &str = "last_flush_reason";

/// One row of the `warmed_urls` relation.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmedUrl {
    pub url: String,
    pub last_warmed_utc: String,
    pub last_status: i64,
    pub last_error: String,
    pub warmed_count: i64,
}

/// One row of the `sitemap_records` relation.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapRecord {
    pub sitemap_url: String,
    pub last_fetched_utc: String,
    pub last_error: String,
}

/// Aggregate counters returned by [`Store::stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub warmed_total: i64,
    pub ok_total: i64,
    pub err_total: i64,
    pub last_flush_utc: Option<String>,
}

/// Handle to the embedded state database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the database at `db_path`, applying the
    /// schema idempotently.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create state store directory")?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("failed to open state store")?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to initialize state store schema")?;

        Ok(Self { pool })
    }

    /// Returns `last_flush_utc`, if one has ever been recorded.
    pub async fn get_last_flush(&self) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM meta WHERE key = ?")
                .bind(KEY_LAST_FLUSH_UTC)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read last flush marker")?;
        Ok(row.map(|(v,)| v))
    }

    /// Upserts `last_flush_utc := now` and `last_flush_reason := reason`.
    pub async fn mark_flush(&self, reason: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.context("failed to start transaction")?;

        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(KEY_LAST_FLUSH_UTC)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("failed to upsert last flush timestamp")?;

        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(KEY_LAST_FLUSH_REASON)
        .bind(reason.unwrap_or(""))
        .execute(&mut *tx)
        .await
        .context("failed to upsert last flush reason")?;

        tx.commit().await.context("failed to commit flush marker")?;
        Ok(())
    }

    /// Decides whether `url` needs (re)warming given `rewarm_interval`.
    ///
    /// True if: no record exists; or the record predates the last flush; or
    /// the record is older than `rewarm_interval`. A stored timestamp that
    /// fails to parse is treated as "should warm" (fail open, not closed).
    pub async fn should_warm(&self, url: &str, rewarm_interval: chrono::Duration) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_warmed_utc FROM warmed_urls WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .context("failed to query warmed_urls")?;

        let Some((last_warmed_utc,)) = row else {
            return Ok(true);
        };

        let Ok(last_warmed) = DateTime::parse_from_rfc3339(&last_warmed_utc) else {
            return Ok(true);
        };
        let last_warmed = last_warmed.with_timezone(&Utc);

        if let Some(last_flush_utc) = self.get_last_flush().await? {
            if let Ok(last_flush) = DateTime::parse_from_rfc3339(&last_flush_utc) {
                if last_warmed < last_flush.with_timezone(&Utc) {
                    return Ok(true);
                }
            }
        }

        Ok(Utc::now() - last_warmed >= rewarm_interval)
    }

    /// Upserts a warm outcome. `warmed_count` is set to 1 on insert,
    /// incremented on update.
    pub async fn mark_warmed(&self, url: &str, status: i64, error_msg: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO warmed_urls (url, last_warmed_utc, last_status, last_error, warmed_count)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(url) DO UPDATE SET
                last_warmed_utc = excluded.last_warmed_utc,
                last_status = excluded.last_status,
                last_error = excluded.last_error,
                warmed_count = warmed_urls.warmed_count + 1
            "#,
        )
        .bind(url)
        .bind(&now)
        .bind(status)
        .bind(error_msg)
        .execute(&self.pool)
        .await
        .context("failed to record warm outcome")?;
        Ok(())
    }

    /// Upserts a sitemap fetch outcome. Empty `error_msg` denotes success.
    pub async fn mark_sitemap(&self, sitemap_url: &str, error_msg: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO sitemap_records (sitemap_url, last_fetched_utc, last_error)
            VALUES (?, ?, ?)
            ON CONFLICT(sitemap_url) DO UPDATE SET
                last_fetched_utc = excluded.last_fetched_utc,
                last_error = excluded.last_error
            "#,
        )
        .bind(sitemap_url)
        .bind(&now)
        .bind(error_msg)
        .execute(&self.pool)
        .await
        .context("failed to record sitemap fetch outcome")?;
        Ok(())
    }

    /// Aggregate counters across all `warmed_urls` rows.
    pub async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS warmed_total,
                SUM(CASE WHEN last_status BETWEEN 200 AND 399 AND last_error = '' THEN 1 ELSE 0 END) AS ok_total,
                SUM(CASE WHEN NOT (last_status BETWEEN 200 AND 399 AND last_error = '') THEN 1 ELSE 0 END) AS err_total
            FROM warmed_urls
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to compute stats")?;

        Ok(Stats {
            warmed_total: row.try_get("warmed_total")?,
            ok_total: row.try_get::<Option<i64>, _>("ok_total")?.unwrap_or(0),
            err_total: row.try_get::<Option<i64>, _>("err_total")?.unwrap_or(0),
            last_flush_utc: self.get_last_flush().await?,
        })
    }

    /// Most recently warmed URLs, newest first.
    pub async fn recent_warmed(&self, limit: i64) -> Result<Vec<WarmedUrl>> {
        let rows = sqlx::query(
            "SELECT url, last_warmed_utc, last_status, last_error, warmed_count \
             FROM warmed_urls ORDER BY last_warmed_utc DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query recent warmed urls")?;
        rows.into_iter().map(row_to_warmed_url).collect()
    }

    /// URLs whose most recent outcome was not a success, newest-failure first.
    pub async fn failed(&self, limit: i64) -> Result<Vec<WarmedUrl>> {
        let rows = sqlx::query(
            "SELECT url, last_warmed_utc, last_status, last_error, warmed_count \
             FROM warmed_urls \
             WHERE NOT (last_status BETWEEN 200 AND 399 AND last_error = '') \
             ORDER BY last_warmed_utc DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query failed urls")?;
        rows.into_iter().map(row_to_warmed_url).collect()
    }

    /// All sitemap records, most recently fetched first.
    pub async fn sitemap_status(&self) -> Result<Vec<SitemapRecord>> {
        let rows = sqlx::query(
            "SELECT sitemap_url, last_fetched_utc, last_error \
             FROM sitemap_records ORDER BY last_fetched_utc DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to query sitemap status")?;

        rows.into_iter()
            .map(|row| {
                Ok(SitemapRecord {
                    sitemap_url: row.try_get("sitemap_url")?,
                    last_fetched_utc: row.try_get("last_fetched_utc")?,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }
}

fn row_to_warmed_url(row: sqlx::sqlite::SqliteRow) -> Result<WarmedUrl> {
    Ok(WarmedUrl {
        url: row.try_get("url")?,
        last_warmed_utc: row.try_get("last_warmed_utc")?,
        last_status: row.try_get("last_status")?,
        last_error: row.try_get("last_error")?,
        warmed_count: row.try_get("warmed_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("state.db")).await.expect("open store");
        (store, dir)
    }

    #[tokio::test]
    async fn new_url_should_warm() {
        let (store, _dir) = open_temp().await;
        assert!(store.should_warm("https://x/a", chrono::Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn recently_warmed_url_should_not_rewarm() {
        let (store, _dir) = open_temp().await;
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        assert!(!store.should_warm("https://x/a", chrono::Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn mark_warmed_increments_count_on_update() {
        let (store, _dir) = open_temp().await;
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        let recent = store.recent_warmed(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].warmed_count, 2);
    }

    #[tokio::test]
    async fn flush_forces_rewarm_of_older_records() {
        let (store, _dir) = open_temp().await;
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        assert!(!store.should_warm("https://x/a", chrono::Duration::hours(24)).await.unwrap());

        store.mark_flush(Some("test")).await.unwrap();
        assert!(store.should_warm("https://x/a", chrono::Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn stats_counts_ok_and_err_separately() {
        let (store, _dir) = open_temp().await;
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        store.mark_warmed("https://x/b", 404, "HTTP 404").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.warmed_total, 2);
        assert_eq!(stats.ok_total, 1);
        assert_eq!(stats.err_total, 1);
    }

    #[tokio::test]
    async fn failed_lists_only_non_success_outcomes() {
        let (store, _dir) = open_temp().await;
        store.mark_warmed("https://x/a", 200, "").await.unwrap();
        store.mark_warmed("https://x/b", 500, "HTTP 500").await.unwrap();
        let failed = store.failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].url, "https://x/b");
    }

    #[tokio::test]
    async fn sitemap_status_reflects_last_outcome() {
        let (store, _dir) = open_temp().await;
        store.mark_sitemap("https://x/sitemap.xml", "").await.unwrap();
        store.mark_sitemap("https://x/broken.xml", "fetch failed").await.unwrap();
        let status = store.sitemap_status().await.unwrap();
        assert_eq!(status.len(), 2);
    }
}
