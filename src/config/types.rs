use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure for the mirror
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub index: Vec<IndexEntry>,
    #[serde(default)]
    pub sellers: SellersConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
}

/// Seller candidate list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellersConfig {
    /// Path to a JSON array of seller ids to consider; when absent, every
    /// seller already in the store is a candidate
    pub path: Option<String>,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Page size for item review fetches
    #[serde(rename = "review-page-size", default = "default_review_page_size")]
    pub review_page_size: usize,

    /// Age after which an item needs a full crawl again (days)
    #[serde(rename = "refresh-window-days", default = "default_refresh_window_days")]
    pub refresh_window_days: i64,

    /// Age after which the seller review cache cannot skip a fetch (days)
    #[serde(
        rename = "seller-review-max-age-days",
        default = "default_review_cache_age"
    )]
    pub seller_review_max_age_days: i64,

    /// Age after which a seller profile is stale (days)
    #[serde(rename = "seller-refresh-days", default = "default_seller_refresh_days")]
    pub seller_refresh_days: i64,

    /// Concurrency bound for the item enrichment pool
    #[serde(rename = "item-concurrency", default = "default_concurrency")]
    pub item_concurrency: usize,

    /// Concurrency bound for the seller enrichment pool
    #[serde(rename = "seller-concurrency", default = "default_concurrency")]
    pub seller_concurrency: usize,

    /// Maximum sellers enriched per run
    #[serde(rename = "enrich-limit", default = "default_enrich_limit")]
    pub enrich_limit: usize,

    /// Whether a missing manifesto counts as a missing essential field
    #[serde(rename = "require-manifesto", default)]
    pub require_manifesto: bool,

    /// Crawl every item in full mode, ignoring staleness metadata
    #[serde(rename = "force-all", default)]
    pub force_all: bool,

    /// Maximum seller reviews stored per seller
    #[serde(rename = "max-seller-reviews", default = "default_max_seller_reviews")]
    pub max_seller_reviews: usize,
}

fn default_review_page_size() -> usize {
    100
}

fn default_refresh_window_days() -> i64 {
    80
}

fn default_review_cache_age() -> i64 {
    2
}

fn default_seller_refresh_days() -> i64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_enrich_limit() -> usize {
    100
}

fn default_max_seller_reviews() -> usize {
    250
}

/// Target site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Bare host of the target site (no scheme), e.g. "market.example"
    #[serde(rename = "primary-host")]
    pub primary_host: String,

    /// Alternate hosts tried when the primary fails
    #[serde(rename = "alt-hosts", default)]
    pub alt_hosts: Vec<String>,

    /// Markets mirrored from the site
    #[serde(default)]
    pub markets: Vec<String>,

    /// Precomputed location-filter cookie values, one per market
    #[serde(rename = "location-tokens", default)]
    pub location_tokens: HashMap<String, String>,
}

impl SiteConfig {
    /// Base URL of the primary host
    pub fn primary_url(&self) -> String {
        format!("https://{}", self.primary_host)
    }

    /// Base URLs of the bare and "www" variants of the primary host
    pub fn host_variants(&self) -> (String, String) {
        (
            format!("https://{}", self.primary_host),
            format!("https://www.{}", self.primary_host),
        )
    }

    /// Ordered fetch hosts: primary first, then alternates
    pub fn fetch_hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.primary_url()];
        hosts.extend(self.alt_hosts.iter().map(|h| format!("https://{h}")));
        hosts
    }

    /// Resolves the runtime endpoint set for this site
    pub fn endpoints(&self) -> SiteEndpoints {
        let (primary, www_variant) = self.host_variants();
        SiteEndpoints {
            primary,
            www_variant,
            alternates: self.alt_hosts.iter().map(|h| format!("https://{h}")).collect(),
            location_tokens: self.location_tokens.clone(),
        }
    }
}

/// Resolved base URLs and per-market tokens used by the fetch layers
///
/// Derived from [`SiteConfig`]; kept separate so tests can point it at a
/// local server.
#[derive(Debug, Clone)]
pub struct SiteEndpoints {
    /// Base URL of the primary host
    pub primary: String,
    /// Base URL of the "www" variant of the primary host
    pub www_variant: String,
    /// Base URLs of the alternate hosts
    pub alternates: Vec<String>,
    /// Precomputed location-filter cookie values, one per market
    pub location_tokens: HashMap<String, String>,
}

impl SiteEndpoints {
    /// Ordered fetch hosts: primary first, then alternates
    pub fn fetch_hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.primary.clone()];
        hosts.extend(self.alternates.iter().cloned());
        hosts
    }

    /// Hosts tried for login: the bare and "www" variants
    pub fn login_hosts(&self) -> Vec<String> {
        vec![self.primary.clone(), self.www_variant.clone()]
    }
}

/// Session manager configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Login username; `MIRROR_USERNAME` overrides
    pub username: Option<String>,

    /// Login password; `MIRROR_PASSWORD` overrides
    pub password: Option<String>,

    /// Login attempt rounds before falling back to anonymous access
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Name of the cookie that proves a login succeeded
    #[serde(rename = "auth-cookie", default = "default_auth_cookie")]
    pub auth_cookie: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_auth_cookie() -> String {
    "sid".to_string()
}

impl SessionConfig {
    /// Applies `MIRROR_USERNAME` / `MIRROR_PASSWORD` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(user) = std::env::var("MIRROR_USERNAME") {
            if !user.is_empty() {
                self.username = Some(user);
            }
        }
        if let Ok(pass) = std::env::var("MIRROR_PASSWORD") {
            if !pass.is_empty() {
                self.password = Some(pass);
            }
        }
        self
    }

    /// Whether credentials are configured at all
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file backing the key-value store
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One market index snapshot consumed by the worklist builder
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    /// Market this snapshot belongs to
    pub market: String,

    /// Path to the JSON snapshot file
    pub path: String,
}

/// Seller blacklist
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub sellers: Vec<String>,
}
