//! Shipping staleness tracker
//!
//! Maintains the per-item, per-market refresh timestamps in the
//! shipping-meta aggregate. The shipping window (7 days) is deliberately
//! much shorter than the full-crawl window (80 days): shipping prices
//! drift faster than listings.

use crate::records::{format_ts, parse_ts, ShippingMetaEntry};
use chrono::{DateTime, Duration, Utc};

/// Markets with a snapshot older than this need a shipping refetch
pub const SHIPPING_STALENESS_DAYS: i64 = 7;

/// Returns the target markets whose shipping data is stale
///
/// An absent entry makes every target market stale. Otherwise a market is
/// stale when its own timestamp (falling back to the entry's global
/// `last_refresh`) is absent or older than the shipping window.
pub fn stale_markets(
    entry: Option<&ShippingMetaEntry>,
    targets: &[String],
    now: DateTime<Utc>,
) -> Vec<String> {
    let Some(entry) = entry else {
        return targets.to_vec();
    };

    let window = Duration::days(SHIPPING_STALENESS_DAYS);
    targets
        .iter()
        .filter(|market| {
            let stamp = entry
                .markets
                .get(market.as_str())
                .or(entry.last_refresh.as_ref());
            match stamp.and_then(|s| parse_ts(s)) {
                Some(ts) => now - ts > window,
                None => true,
            }
        })
        .cloned()
        .collect()
}

/// Stamps the refreshed markets and the entry's global `last_refresh`
pub fn mark_refreshed(entry: &mut ShippingMetaEntry, markets: &[String], now: DateTime<Utc>) {
    let stamp = format_ts(now);
    for market in markets {
        entry.markets.insert(market.clone(), stamp.clone());
    }
    entry.last_refresh = Some(stamp);
}

/// Records the index token seen at this refresh, if it moved forward
pub fn note_indexed(entry: &mut ShippingMetaEntry, lua: Option<&str>) {
    let Some(lua) = lua else {
        return;
    };
    match &entry.last_indexed_lua {
        Some(existing) if existing.as_str() >= lua => {}
        _ => entry.last_indexed_lua = Some(lua.to_string()),
    }
}

/// Stamps a completed full crawl; `last_full_crawl` never moves backward
pub fn mark_full_crawl(entry: &mut ShippingMetaEntry, now: DateTime<Utc>) {
    let stamp = format_ts(now);
    match &entry.last_full_crawl {
        Some(existing) if existing.as_str() >= stamp.as_str() => {}
        _ => entry.last_full_crawl = Some(stamp),
    }
}
