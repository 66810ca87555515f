//! Item enrichment
//!
//! This module drives per-item enrichment: review refresh, description
//! extraction, and per-market shipping snapshots. Each sub-step is retried
//! and isolated so one failure never blocks the others, and the per-item
//! entry point is idempotent so an external step scheduler can invoke it
//! directly.

mod item;
mod shipping;

pub use item::{enrich_item, enrich_single, run_item_pool, EnrichContext, ItemOutcome};
pub use shipping::{fetch_market_shipping, fetch_markets_settled, MarketFetchOutcome};

/// Site path of an item page
pub fn item_path(id: &str) -> String {
    format!("/item/{id}")
}

/// Site path of the item reviews endpoint
pub fn item_reviews_path(id: &str, limit: usize, offset: usize) -> String {
    format!("/api/items/{id}/reviews?limit={limit}&offset={offset}")
}
