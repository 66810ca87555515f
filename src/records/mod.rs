//! Record types persisted by the mirror
//!
//! All timestamps are stored as RFC 3339 strings in UTC. Index "last
//! updated" tokens are opaque ISO-datetime-like strings and are compared
//! lexicographically; real timestamps are parsed when a duration check is
//! needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Formats a timestamp for persistence
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parses a persisted timestamp, returning None for malformed values
///
/// Malformed timestamps are treated as absent by every staleness check, so
/// a corrupted record degrades to "stale" rather than an error.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One market's index snapshot: the raw item ids listed in that market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketIndex {
    pub market: String,
    pub items: Vec<String>,
    /// Optional per-item "last updated" tokens from the index page
    #[serde(default)]
    pub updated: HashMap<String, String>,
}

/// An item id with the set of markets it appears in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub markets: Vec<String>,
}

/// Partition of all observed ids for one run
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    /// Every distinct id observed across all market indexes
    pub unique_ids: Vec<String>,
    /// Ids not yet present in the shared core store
    pub to_crawl: Vec<WorkItem>,
    /// Ids already present in the shared core store
    pub already_have: Vec<WorkItem>,
}

/// Per-item freshness record, kept in the shipping-meta aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingMetaEntry {
    /// Per-market refresh timestamps
    #[serde(default)]
    pub markets: HashMap<String, String>,
    /// Last time any shipping data for this item was refreshed
    pub last_refresh: Option<String>,
    /// The index "last updated" token seen at the last refresh
    pub last_indexed_lua: Option<String>,
    /// Last time a full crawl (description + shipping + reviews) completed
    pub last_full_crawl: Option<String>,
}

/// Crawl depth decided for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlMode {
    /// Fetch description, shipping, and reviews
    Full,
    /// Cheap refresh: reviews only
    ReviewsOnly,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::ReviewsOnly => "reviews-only",
        }
    }
}

/// Crawl decision for one item, consumed once by the orchestrator
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub id: String,
    pub markets: Vec<String>,
    pub mode: CrawlMode,
    /// Index "last updated" token for this id, if the index carried one
    pub lua: Option<String>,
}

/// A single item review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReview {
    pub id: String,
    pub author: Option<String>,
    pub rating: Option<f64>,
    pub body: Option<String>,
    pub created: Option<String>,
}

/// Metadata about an extracted description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionMeta {
    pub chars: usize,
    pub truncated: bool,
}

/// Shared (market-independent) item facts, key `items/core/{id}.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCoreRecord {
    pub id: String,
    #[serde(default)]
    pub reviews: Vec<ItemReview>,
    pub description: Option<String>,
    pub description_meta: Option<DescriptionMeta>,
    pub last_reviews_refresh: Option<String>,
    pub last_description_refresh: Option<String>,
}

/// A single shipping option parsed from an item page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub label: String,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub destination: Option<String>,
}

/// Per-market shipping snapshot, key `shipping/{id}.json` in that market's
/// namespace; overwritten wholesale on each refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketShippingRecord {
    pub id: String,
    pub market: String,
    pub options: Vec<ShippingOption>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub last_shipping_refresh: String,
}

/// A single seller review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerReview {
    pub id: String,
    pub rating: Option<f64>,
    pub body: Option<String>,
    pub created: Option<String>,
}

/// Seller summary statistics fetched from the lightweight endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SellerStats {
    pub sales: Option<u64>,
    pub rating: Option<f64>,
    pub disputes: Option<u64>,
}

/// Enriched seller facts, key `sellers/{id}.json`
///
/// Read-merge-write: a field missing this run never erases a previously
/// captured value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SellerProfileRecord {
    pub seller_id: String,
    pub image_url: Option<String>,
    pub online: Option<bool>,
    pub joined: Option<String>,
    pub manifesto: Option<String>,
    pub share: Option<String>,
    pub summary: Option<String>,
    pub statistics: Option<SellerStats>,
    #[serde(default)]
    pub reviews: Vec<SellerReview>,
    pub last_enriched_at: Option<String>,
}

/// Per-seller "newest review seen" watermark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerReviewCacheEntry {
    pub newest_review_created: Option<String>,
    pub newest_review_id: Option<String>,
    pub updated_at: String,
}

/// Compact per-seller state used by the fast planning path
#[derive(Debug, Clone, Default)]
pub struct SellerState {
    pub last_enriched_at: Option<String>,
    pub has_image: bool,
    pub has_share: bool,
    pub has_manifesto: bool,
    pub has_reviews: bool,
    pub review_count: usize,
}

impl SellerState {
    /// Summarizes a stored profile record for planning
    pub fn from_profile(record: &SellerProfileRecord) -> Self {
        Self {
            last_enriched_at: record.last_enriched_at.clone(),
            has_image: record.image_url.is_some(),
            has_share: record.share.is_some(),
            has_manifesto: record.manifesto.is_some(),
            has_reviews: !record.reviews.is_empty(),
            review_count: record.reviews.len(),
        }
    }
}

// Store key families

/// Key for the shared item core record
pub fn item_core_key(id: &str) -> String {
    format!("items/core/{id}.json")
}

/// Key for a per-market shipping record (within that market's namespace)
pub fn shipping_key(id: &str) -> String {
    format!("shipping/{id}.json")
}

/// Key for a seller profile record
pub fn seller_key(id: &str) -> String {
    format!("sellers/{id}.json")
}

/// Shipping-meta aggregate key
pub const SHIPPING_META_KEY: &str = "aggregates/shipping-meta.json";

/// Seller review cache aggregate key
pub const SELLER_REVIEW_CACHE_KEY: &str = "aggregates/seller-review-cache.json";

/// Seller images aggregate key
pub const SELLER_IMAGES_KEY: &str = "aggregates/seller-images.json";

/// Persisted session cookies key
pub const SESSION_COOKIES_KEY: &str = "session/cookies.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_roundtrip() {
        let now = Utc::now();
        let raw = format_ts(now);
        let parsed = parse_ts(&raw).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_parse_ts_malformed() {
        assert!(parse_ts("not-a-timestamp").is_none());
        assert!(parse_ts("").is_none());
    }

    #[test]
    fn test_seller_state_from_profile() {
        let record = SellerProfileRecord {
            seller_id: "s1".to_string(),
            image_url: Some("https://img".to_string()),
            reviews: vec![SellerReview {
                id: "r1".to_string(),
                rating: Some(5.0),
                body: None,
                created: None,
            }],
            ..Default::default()
        };

        let state = SellerState::from_profile(&record);
        assert!(state.has_image);
        assert!(!state.has_share);
        assert!(!state.has_manifesto);
        assert!(state.has_reviews);
        assert_eq!(state.review_count, 1);
    }

    #[test]
    fn test_item_core_record_json_shape() {
        let record = ItemCoreRecord {
            id: "a1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ItemCoreRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "a1");
        assert!(back.reviews.is_empty());
    }

    #[test]
    fn test_key_families() {
        assert_eq!(item_core_key("x9"), "items/core/x9.json");
        assert_eq!(shipping_key("x9"), "shipping/x9.json");
        assert_eq!(seller_key("s4"), "sellers/s4.json");
    }
}
