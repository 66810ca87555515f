//! Item enrichment orchestrator
//!
//! Drives the three per-item sub-steps (reviews, description, shipping)
//! independently: a failure in one is logged and skipped, the others still
//! run, and previously persisted fields stay untouched. The per-item entry
//! point re-merges fields on repeat invocations, so an at-least-once step
//! scheduler can call it safely.

use crate::config::SiteEndpoints;
use crate::enrich::shipping::fetch_markets_settled;
use crate::enrich::{item_path, item_reviews_path};
use crate::fetch::{classify_reqwest_error, fetch_capped};
use crate::parsers::parse_description;
use crate::planner::{mark_full_crawl, mark_refreshed, note_indexed, stale_markets};
use crate::pool::TaskPool;
use crate::records::{
    format_ts, item_core_key, CrawlMode, ItemCoreRecord, ItemReview, PlannedItem,
    ShippingMetaEntry,
};
use crate::session::SessionManager;
use crate::store::{KvStoreExt, Stores};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Byte budget for description fetches; the description sits near the top
/// of the item page
const DESCRIPTION_BYTE_CAP: usize = 96 * 1024;

const REVIEWS_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything a per-item task needs, shared across the pool
pub struct EnrichContext {
    pub session: Arc<SessionManager>,
    pub stores: Arc<Stores>,
    pub endpoints: SiteEndpoints,
    pub review_page_size: usize,
    /// Shipping-meta aggregate: loaded once per run, mutated in memory,
    /// flushed once by the runner
    pub shipping_meta: Arc<Mutex<HashMap<String, ShippingMetaEntry>>>,
}

/// What happened to one item's sub-steps
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub id: String,
    pub mode: CrawlMode,
    pub reviews_ok: bool,
    pub description_ok: bool,
    pub shipping_written: Vec<String>,
    pub shipping_failed: Vec<String>,
}

impl ItemOutcome {
    /// Whether every sub-step this mode required succeeded
    pub fn is_complete(&self) -> bool {
        match self.mode {
            CrawlMode::ReviewsOnly => self.reviews_ok,
            CrawlMode::Full => {
                self.reviews_ok && self.description_ok && self.shipping_failed.is_empty()
            }
        }
    }
}

/// Enriches a single planned item
///
/// Reviews run for every mode; description and shipping only for full
/// crawls. Each sub-step is an independent read-merge-write against the
/// item's records.
pub async fn enrich_item(
    ctx: &EnrichContext,
    planned: &PlannedItem,
    now: DateTime<Utc>,
) -> ItemOutcome {
    let mut outcome = ItemOutcome {
        id: planned.id.clone(),
        mode: planned.mode,
        reviews_ok: false,
        description_ok: false,
        shipping_written: Vec::new(),
        shipping_failed: Vec::new(),
    };

    outcome.reviews_ok = refresh_reviews(ctx, &planned.id, now).await;

    if planned.mode == CrawlMode::Full {
        outcome.description_ok = refresh_description(ctx, &planned.id, now).await;
        refresh_shipping(ctx, planned, now, &mut outcome).await;
    }

    // A full crawl only counts as full once every sub-step landed;
    // otherwise the item stays eligible for full mode next run.
    if planned.mode == CrawlMode::Full && outcome.is_complete() {
        let mut meta = ctx.shipping_meta.lock().unwrap();
        let entry = meta.entry(planned.id.clone()).or_default();
        mark_full_crawl(entry, now);
        note_indexed(entry, planned.lua.as_deref());
    }

    outcome
}

/// Enriches one item outside a batch (external step-scheduler entry)
pub async fn enrich_single(
    ctx: &EnrichContext,
    id: &str,
    markets: &[String],
    now: DateTime<Utc>,
) -> ItemOutcome {
    let planned = PlannedItem {
        id: id.to_string(),
        markets: markets.to_vec(),
        mode: CrawlMode::Full,
        lua: None,
    };
    enrich_item(ctx, &planned, now).await
}

/// Runs the item pool over a plan, settle-all
pub async fn run_item_pool(
    ctx: Arc<EnrichContext>,
    planned: Vec<PlannedItem>,
    pool: &TaskPool,
    now: DateTime<Utc>,
) -> Vec<ItemOutcome> {
    let tasks: Vec<_> = planned
        .into_iter()
        .map(|item| {
            let ctx = Arc::clone(&ctx);
            async move { enrich_item(&ctx, &item, now).await }
        })
        .collect();

    pool.run_all(tasks).await.into_iter().flatten().collect()
}

/// Fetches the first page of reviews and merges it into the core record
async fn refresh_reviews(ctx: &EnrichContext, id: &str, now: DateTime<Utc>) -> bool {
    let url = format!(
        "{}{}",
        ctx.endpoints.primary,
        item_reviews_path(id, ctx.review_page_size, 0)
    );

    let response = match ctx
        .session
        .client()
        .get(&url)
        .timeout(REVIEWS_TIMEOUT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(
                "review fetch failed for item {}: {}",
                id,
                classify_reqwest_error(&url, e)
            );
            return false;
        }
    };

    if !response.status().is_success() {
        tracing::warn!(
            "review fetch for item {} returned HTTP {}",
            id,
            response.status().as_u16()
        );
        return false;
    }

    let reviews: Vec<ItemReview> = match response.json().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("review payload for item {} did not parse: {}", id, e);
            return false;
        }
    };

    merge_core_record(ctx, id, |record| {
        record.reviews = reviews;
        record.last_reviews_refresh = Some(format_ts(now));
    })
}

/// Fetches the item page and merges the parsed description
async fn refresh_description(ctx: &EnrichContext, id: &str, now: DateTime<Utc>) -> bool {
    let url = format!("{}{}", ctx.endpoints.primary, item_path(id));
    let body = match fetch_capped(
        ctx.session.client(),
        &url,
        DESCRIPTION_TIMEOUT,
        Some(DESCRIPTION_BYTE_CAP),
    )
    .await
    {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("description fetch failed for item {}: {}", id, e);
            return false;
        }
    };

    let parsed = parse_description(&body);
    let Some(text) = parsed.text else {
        tracing::warn!(
            "no description extracted for item {} (warnings: {:?})",
            id,
            parsed.warnings
        );
        return false;
    };

    merge_core_record(ctx, id, |record| {
        record.description = Some(text);
        record.description_meta = parsed.meta;
        record.last_description_refresh = Some(format_ts(now));
    })
}

/// Refetches shipping for the item's stale markets and updates the
/// in-memory aggregate
async fn refresh_shipping(
    ctx: &EnrichContext,
    planned: &PlannedItem,
    now: DateTime<Utc>,
    outcome: &mut ItemOutcome,
) {
    let targets = {
        let meta = ctx.shipping_meta.lock().unwrap();
        stale_markets(meta.get(&planned.id), &planned.markets, now)
    };
    if targets.is_empty() {
        return;
    }

    let outcomes =
        fetch_markets_settled(&ctx.endpoints, &ctx.stores, &planned.id, &targets, now).await;

    for market_outcome in outcomes {
        if market_outcome.written {
            outcome.shipping_written.push(market_outcome.market);
        } else {
            if let Err(e) = &market_outcome.result {
                tracing::warn!(
                    "shipping fetch failed for item {} ({}): {}",
                    planned.id,
                    market_outcome.market,
                    e
                );
            }
            outcome.shipping_failed.push(market_outcome.market);
        }
    }

    if !outcome.shipping_written.is_empty() {
        let mut meta = ctx.shipping_meta.lock().unwrap();
        let entry = meta.entry(planned.id.clone()).or_default();
        mark_refreshed(entry, &outcome.shipping_written, now);
    }
}

/// Read-merge-write against the shared core record
///
/// Store failures are swallowed with a warning: the run continues and only
/// persistence of this sub-step is lost.
fn merge_core_record<F>(ctx: &EnrichContext, id: &str, apply: F) -> bool
where
    F: FnOnce(&mut ItemCoreRecord),
{
    let key = item_core_key(id);
    let mut record: ItemCoreRecord = match ctx.stores.shared.get_json(&key) {
        Ok(Some(r)) => r,
        Ok(None) => ItemCoreRecord {
            id: id.to_string(),
            ..Default::default()
        },
        Err(e) => {
            tracing::warn!("failed to read core record for {}: {}", id, e);
            return false;
        }
    };

    apply(&mut record);

    match ctx.stores.shared.put_json(&key, &record) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("failed to write core record for {}: {}", id, e);
            false
        }
    }
}
