//! Sitemap collector: resolves a set of seed sitemap URLs — including
//! nested sitemap-indexes and gzip-compressed variants — into a
//! de-duplicated page URL set.

pub mod collector;
pub mod fetcher;
pub mod parser;

pub use collector::{VisitedSet, collect};
pub use parser::{ParsedSitemap, parse};
