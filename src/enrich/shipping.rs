//! Multi-market shipping fetcher
//!
//! Each market gets an isolated HTTP session (its own cookie jar) so one
//! market's session state never bleeds into another when markets are
//! fetched concurrently. The precomputed location-filter token is seeded
//! as a cookie for both the bare and "www" host variants, replacing the
//! slower scrape-form-then-POST flow.

use crate::config::SiteEndpoints;
use crate::enrich::item_path;
use crate::fetch::fetch_capped;
use crate::parsers::parse_shipping;
use crate::records::{format_ts, shipping_key, MarketShippingRecord};
use crate::store::{KvStoreExt, Stores};
use crate::MirrorError;
use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use url::Url;

/// Pause between seeding the location cookie and fetching, giving the
/// session state time to settle
const SETTLE_DELAY: Duration = Duration::from_millis(250);

const SHIPPING_TIMEOUT: Duration = Duration::from_secs(15);
const RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// First-pass byte budget; shipping blocks sit in the top half of the page
const SHIPPING_BYTE_CAP: usize = 128 * 1024;

/// Result of one market's shipping fetch within a settle-all batch
#[derive(Debug)]
pub struct MarketFetchOutcome {
    pub market: String,
    pub result: Result<MarketShippingRecord, MirrorError>,
    pub written: bool,
}

/// Fetches one market's shipping options for an item
///
/// Builds an isolated client, seeds the market's location token, fetches
/// the item page byte-capped, and parses shipping options. When no options
/// were parsed, retries once with a larger budget and no early abort.
pub async fn fetch_market_shipping(
    endpoints: &SiteEndpoints,
    market: &str,
    item_id: &str,
    now: DateTime<Utc>,
) -> Result<MarketShippingRecord, MirrorError> {
    let token = endpoints
        .location_tokens
        .get(market)
        .ok_or_else(|| MirrorError::UnknownMarket(market.to_string()))?;

    let client = isolated_market_client(endpoints, token)?;

    tokio::time::sleep(SETTLE_DELAY).await;

    let url = format!("{}{}", endpoints.primary, item_path(item_id));
    let body = fetch_capped(&client, &url, SHIPPING_TIMEOUT, Some(SHIPPING_BYTE_CAP)).await?;
    let (mut options, mut warnings) = parse_shipping(&body);

    if options.is_empty() {
        tracing::debug!(
            "no shipping options in capped fetch for {} ({}), retrying uncapped",
            item_id,
            market
        );
        let body = fetch_capped(&client, &url, RETRY_TIMEOUT, None).await?;
        (options, warnings) = parse_shipping(&body);
    }

    Ok(MarketShippingRecord {
        id: item_id.to_string(),
        market: market.to_string(),
        options,
        warnings: warnings.iter().map(|w| w.as_str().to_string()).collect(),
        last_shipping_refresh: format_ts(now),
    })
}

/// Fetches several markets concurrently, writing each result into that
/// market's store as it lands (settle-all; one market's failure does not
/// block the others)
pub async fn fetch_markets_settled(
    endpoints: &SiteEndpoints,
    stores: &Arc<Stores>,
    item_id: &str,
    markets: &[String],
    now: DateTime<Utc>,
) -> Vec<MarketFetchOutcome> {
    let mut set = JoinSet::new();

    for market in markets {
        let endpoints = endpoints.clone();
        let stores = Arc::clone(stores);
        let market = market.clone();
        let item_id = item_id.to_string();
        set.spawn(async move {
            let result = fetch_market_shipping(&endpoints, &market, &item_id, now).await;
            let mut written = false;
            if let Ok(record) = &result {
                match stores.market(&market) {
                    Some(store) => match store.put_json(&shipping_key(&item_id), record) {
                        Ok(()) => written = true,
                        Err(e) => {
                            tracing::warn!(
                                "failed to write shipping record for {} ({}): {}",
                                item_id,
                                market,
                                e
                            );
                        }
                    },
                    None => {
                        tracing::warn!("no store configured for market {}", market);
                    }
                }
            }
            MarketFetchOutcome {
                market,
                result,
                written,
            }
        });
    }

    let mut outcomes = Vec::with_capacity(markets.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::warn!("market fetch task aborted: {}", e),
        }
    }
    outcomes
}

/// Builds the isolated per-market client with the location token seeded
/// for both host variants
fn isolated_market_client(
    endpoints: &SiteEndpoints,
    token: &str,
) -> Result<Client, MirrorError> {
    let jar = Arc::new(Jar::default());
    for host in [&endpoints.primary, &endpoints.www_variant] {
        let url = Url::parse(host)?;
        jar.add_cookie_str(token, &url);
    }

    let client = Client::builder()
        .cookie_provider(jar)
        .user_agent(concat!("market-mirror/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(45))
        .gzip(true)
        .brotli(true)
        .build()?;
    Ok(client)
}
