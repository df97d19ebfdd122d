pub mod cancel;
pub mod config;
pub mod http;
pub mod limiter;
pub mod load_gate;
pub mod orchestrator;
pub mod sitemap;
pub mod store;
pub mod warmer;

pub use cancel::{CancelToken, Cancelled};
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use store::Store;
