//! Crawl mode planner
//!
//! For each item id, decides between a full crawl (description + shipping +
//! reviews) and a cheap reviews-only refresh, driven by the shipping-meta
//! aggregate and index-change detection.

use crate::records::{parse_ts, CrawlMode, PlannedItem, ShippingMetaEntry};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Planner options
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Crawl everything in full mode, skipping the metadata entirely
    pub force_all: bool,
    /// Age after which an item needs a periodic full refresh
    pub refresh_window_days: i64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            force_all: false,
            refresh_window_days: 80,
        }
    }
}

/// Result of a planning pass
#[derive(Debug, Clone)]
pub struct ModePlan {
    pub planned: Vec<PlannedItem>,
    /// Items forced to full because their index token moved (diagnostic)
    pub index_changed_count: u32,
    /// Items forced to full because they have refreshed but never fully
    /// crawled (diagnostic; guards against items stuck in incremental mode)
    pub no_full_crawl_count: u32,
}

/// Plans the crawl mode for every id
///
/// The decision ladder per id, first match wins:
/// 1. `force_all` - full for everything, metadata not consulted
/// 2. no metadata entry, or entry without `last_refresh` - full
/// 3. `last_refresh` present but `last_full_crawl` absent - full
/// 4. `last_full_crawl` older than the refresh window - full
/// 5. index token newer than the stored one (or none stored) - full
/// 6. otherwise - reviews-only
pub fn plan_item_modes(
    ids: &[String],
    presence: &HashMap<String, Vec<String>>,
    index_tokens: &HashMap<String, String>,
    meta: &HashMap<String, ShippingMetaEntry>,
    opts: &PlanOptions,
    now: DateTime<Utc>,
) -> ModePlan {
    let mut planned = Vec::with_capacity(ids.len());
    let mut index_changed_count = 0;
    let mut no_full_crawl_count = 0;

    if opts.force_all {
        for id in ids {
            planned.push(make_planned(id, presence, index_tokens, CrawlMode::Full));
        }
        return ModePlan {
            planned,
            index_changed_count,
            no_full_crawl_count,
        };
    }

    let window = Duration::days(opts.refresh_window_days);

    for id in ids {
        let lua = index_tokens.get(id);
        let mode = match meta.get(id) {
            None => CrawlMode::Full,
            Some(entry) if entry.last_refresh.is_none() => CrawlMode::Full,
            Some(entry) if entry.last_full_crawl.is_none() => {
                no_full_crawl_count += 1;
                CrawlMode::Full
            }
            Some(entry) => {
                let full_crawl_age = entry
                    .last_full_crawl
                    .as_deref()
                    .and_then(parse_ts)
                    .map(|ts| now - ts);
                match full_crawl_age {
                    // Unparseable timestamps count as stale
                    None => CrawlMode::Full,
                    Some(age) if age > window => CrawlMode::Full,
                    Some(_) => {
                        if index_token_moved(lua, entry.last_indexed_lua.as_deref()) {
                            index_changed_count += 1;
                            CrawlMode::Full
                        } else {
                            CrawlMode::ReviewsOnly
                        }
                    }
                }
            }
        };
        planned.push(make_planned(id, presence, index_tokens, mode));
    }

    ModePlan {
        planned,
        index_changed_count,
        no_full_crawl_count,
    }
}

/// An index token forces a full crawl when one exists and it is newer than
/// the stored token, or nothing was stored yet
fn index_token_moved(current: Option<&String>, stored: Option<&str>) -> bool {
    match (current, stored) {
        (Some(_), None) => true,
        (Some(current), Some(stored)) => current.as_str() > stored,
        (None, _) => false,
    }
}

fn make_planned(
    id: &str,
    presence: &HashMap<String, Vec<String>>,
    index_tokens: &HashMap<String, String>,
    mode: CrawlMode,
) -> PlannedItem {
    PlannedItem {
        id: id.to_string(),
        markets: presence.get(id).cloned().unwrap_or_default(),
        mode,
        lua: index_tokens.get(id).cloned(),
    }
}
