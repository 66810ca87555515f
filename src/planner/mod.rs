//! Crawl planning
//!
//! Decides how deeply each item is crawled this run (full vs reviews-only)
//! and tracks per-market shipping freshness. Both decisions are pure
//! functions of the loaded metadata aggregate and a caller-supplied "now",
//! so they are testable without network or store access.

mod modes;
mod shipping_meta;

pub use modes::{plan_item_modes, ModePlan, PlanOptions};
pub use shipping_meta::{
    mark_full_crawl, mark_refreshed, note_indexed, stale_markets, SHIPPING_STALENESS_DAYS,
};
