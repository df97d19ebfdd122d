//! Configuration for the cache warmer: on-disk TOML format, loading,
//! path resolution, and validation.

pub mod loader;
pub mod types;

pub use loader::{ConfigError, load, write_default};
pub use types::{AppConfig, Config, HttpConfig, LoadConfig, SitemapsConfig};
