//! Market-Mirror: a freshness-aware marketplace mirror
//!
//! This crate maintains a local mirror of third-party marketplace data
//! (items, reviews, descriptions, per-market shipping options, seller
//! profiles) by crawling a remote site under rate and session constraints.

pub mod config;
pub mod enrich;
pub mod fetch;
pub mod parsers;
pub mod planner;
pub mod pool;
pub mod records;
pub mod runner;
pub mod sellers;
pub mod session;
pub mod store;
pub mod worklist;

use thiserror::Error;

/// Main error type for mirror operations
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Index snapshot error for {path}: {message}")]
    IndexSnapshot { path: String, message: String },

    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid host in config: {0}")]
    InvalidHost(String),
}

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use records::{CrawlMode, PlannedItem, Worklist};
pub use session::SessionManager;
pub use store::{KvStore, Stores};
