//! Loading, path resolution, and validation of [`Config`] from a TOML file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use super::types::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config file already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("invalid sitemap URL {url:?}: {reason}")]
    InvalidSitemapUrl { url: String, reason: String },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: String },
}

/// Loads config from `path`, resolving `app.db_path` / `app.log_file`
/// relative to the directory containing `path`, and validates it.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.app.db_path = resolve(base, &config.app.db_path);
    config.app.log_file = config.app.log_file.as_ref().map(|p| resolve(base, p));

    validate(&config)?;
    Ok(config)
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    for url in &config.sitemaps.urls {
        let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidSitemapUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidSitemapUrl {
                url: url.clone(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
    }

    if config.http.concurrency == 0 {
        return Err(ConfigError::NonPositive {
            field: "http.concurrency",
            value: "0".to_string(),
        });
    }
    if config.load.max_load <= 0.0 {
        return Err(ConfigError::NonPositive {
            field: "load.max_load",
            value: config.load.max_load.to_string(),
        });
    }

    Ok(())
}

/// Writes a default config to `path`, computing `load.max_load` from the
/// host's CPU count as `max(1.0, cpus - 1)`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }

    let mut config = Config::default();
    let cpus = num_cpus::get() as f64;
    config.load.max_load = (cpus - 1.0).max(1.0);

    let rendered = toml::to_string_pretty(&config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    std::fs::write(path, rendered).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed.http.concurrency, config.http.concurrency);
    }

    #[test]
    fn relative_db_path_resolves_against_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("cachewarm.toml");
        write_default(&config_path, false).expect("write default");

        let config = load(&config_path).expect("load");
        assert_eq!(config.app.db_path, dir.path().join("cachewarm.db"));
    }

    #[test]
    fn write_default_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("cachewarm.toml");
        write_default(&config_path, false).expect("first write");
        let err = write_default(&config_path, false).expect_err("should refuse");
        assert!(matches!(err, ConfigError::AlreadyExists(_)));
        write_default(&config_path, true).expect("force overwrite");
    }

    #[test]
    fn rejects_non_http_sitemap_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("cachewarm.toml");
        let toml_text = format!(
            "[app]\ndb_path = \"cachewarm.db\"\n[http]\n[load]\n[sitemaps]\nurls = [\"ftp://example.com/sitemap.xml\"]\n"
        );
        std::fs::write(&config_path, toml_text).expect("write");
        let err = load(&config_path).expect_err("should fail validation");
        assert!(matches!(err, ConfigError::InvalidSitemapUrl { .. }));
        let _ = dir;
    }
}
