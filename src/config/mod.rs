//! Configuration module
//!
//! Handles loading, parsing, and validating the TOML configuration file,
//! including environment overrides for session credentials.

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    BlacklistConfig, Config, CrawlerConfig, IndexEntry, OutputConfig, SellersConfig,
    SessionConfig, SiteConfig, SiteEndpoints,
};
pub use validation::validate;
