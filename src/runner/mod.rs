//! Run coordination
//!
//! Wires the whole batch together: load indexes, build the worklist, plan
//! crawl modes, drive the item and seller pools, and flush the in-memory
//! aggregates once at the end. Aggregates are loaded once per run and
//! mutated in memory; a crash mid-run loses the aggregate updates but not
//! the per-entity records already written.

use crate::config::Config;
use crate::enrich::{run_item_pool, EnrichContext};
use crate::planner::{plan_item_modes, PlanOptions};
use crate::pool::TaskPool;
use crate::records::{
    format_ts, CrawlMode, MarketIndex, SellerReviewCacheEntry, ShippingMetaEntry,
    SELLER_IMAGES_KEY, SELLER_REVIEW_CACHE_KEY, SHIPPING_META_KEY,
};
use crate::sellers::{
    plan_sellers, run_seller_pool, AggregateStateSource, ReviewFetchConfig, SellerContext,
    SellerPlanOptions,
};
use crate::session::SessionManager;
use crate::store::{KvStoreExt, Stores};
use crate::worklist::{build_worklist, merge_index_tokens, presence_map};
use crate::MirrorError;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Batch-level counts reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub config_hash: String,

    pub unique_ids: usize,
    pub to_crawl: usize,
    pub already_have: usize,

    pub items_full: usize,
    pub items_reviews_only: usize,
    pub items_complete: usize,
    pub items_with_failures: usize,
    pub index_changed_count: u32,
    pub no_full_crawl_count: u32,

    pub sellers_enriched: usize,
    pub sellers_written: usize,
    pub sellers_failed: usize,
    pub sellers_missing_essentials: usize,
    pub sellers_skipped_fresh: usize,
    pub sellers_skipped_blacklisted: usize,
    pub sellers_over_cap: usize,
}

impl RunSummary {
    /// Prints the operational summary
    pub fn print(&self) {
        println!("=== Mirror Run Summary ===\n");
        println!("Worklist:");
        println!("  Unique ids:   {}", self.unique_ids);
        println!("  To crawl:     {}", self.to_crawl);
        println!("  Already have: {}", self.already_have);

        println!("\nItems:");
        println!("  Full crawls:      {}", self.items_full);
        println!("  Reviews-only:     {}", self.items_reviews_only);
        println!("  Completed:        {}", self.items_complete);
        println!("  With failures:    {}", self.items_with_failures);
        println!("  Index changed:    {}", self.index_changed_count);
        println!("  No-full-crawl:    {}", self.no_full_crawl_count);

        println!("\nSellers:");
        println!("  Enriched:           {}", self.sellers_enriched);
        println!("  Written:            {}", self.sellers_written);
        println!("  Failed:             {}", self.sellers_failed);
        println!("  Missing essentials: {}", self.sellers_missing_essentials);
        println!("  Skipped (fresh):    {}", self.sellers_skipped_fresh);
        println!("  Skipped (blacklist):{}", self.sellers_skipped_blacklisted);
        println!("  Over cap:           {}", self.sellers_over_cap);
    }
}

/// Runs one complete mirror batch
pub async fn run_mirror(config: &Config, config_hash: &str) -> Result<RunSummary, MirrorError> {
    let started_at = format_ts(Utc::now());
    let stores = Arc::new(Stores::open(
        Path::new(&config.output.database_path),
        &config.site.markets,
    )?);
    let endpoints = config.site.endpoints();

    let session = Arc::new(
        SessionManager::establish(&config.session, &endpoints.login_hosts(), &stores.shared)
            .await?,
    );

    // Worklist from the market index snapshots
    let indexes = load_index_snapshots(config)?;
    let existing = existing_item_ids(&stores)?;
    let worklist = build_worklist(&indexes, &existing);
    let presence = presence_map(&worklist);
    let index_tokens = merge_index_tokens(&indexes);
    tracing::info!(
        "worklist: {} unique ids ({} new, {} known)",
        worklist.unique_ids.len(),
        worklist.to_crawl.len(),
        worklist.already_have.len()
    );

    // One aggregate read covers every planning decision
    let shipping_meta: HashMap<String, ShippingMetaEntry> = stores
        .shared
        .get_json(SHIPPING_META_KEY)?
        .unwrap_or_default();

    let now = Utc::now();
    let plan = plan_item_modes(
        &worklist.unique_ids,
        &presence,
        &index_tokens,
        &shipping_meta,
        &PlanOptions {
            force_all: config.crawler.force_all,
            refresh_window_days: config.crawler.refresh_window_days,
        },
        now,
    );
    let items_full = plan
        .planned
        .iter()
        .filter(|p| p.mode == CrawlMode::Full)
        .count();
    tracing::info!(
        "planned {} items ({} full, {} reviews-only, index-changed {}, no-full-crawl {})",
        plan.planned.len(),
        items_full,
        plan.planned.len() - items_full,
        plan.index_changed_count,
        plan.no_full_crawl_count
    );

    // Item enrichment pool
    let shipping_meta = Arc::new(Mutex::new(shipping_meta));
    let item_ctx = Arc::new(EnrichContext {
        session: Arc::clone(&session),
        stores: Arc::clone(&stores),
        endpoints: endpoints.clone(),
        review_page_size: config.crawler.review_page_size,
        shipping_meta: Arc::clone(&shipping_meta),
    });
    let item_pool = TaskPool::new(config.crawler.item_concurrency);
    let item_outcomes =
        run_item_pool(Arc::clone(&item_ctx), plan.planned.clone(), &item_pool, now).await;

    // Single aggregate flush for the whole run
    {
        let meta = shipping_meta.lock().unwrap().clone();
        if let Err(e) = stores.shared.put_json(SHIPPING_META_KEY, &meta) {
            tracing::warn!("failed to flush shipping-meta aggregate: {}", e);
        }
    }

    // Seller planning against the precomputed aggregate (fast path)
    let candidates = seller_candidates(config, &stores)?;
    let state_source = AggregateStateSource::build(&stores.shared);
    let seller_plan = plan_sellers(
        &state_source,
        &candidates,
        &SellerPlanOptions {
            blacklist: config.blacklist.sellers.iter().cloned().collect(),
            force_full: config.crawler.force_all,
            refresh_days: config.crawler.seller_refresh_days,
            require_manifesto: config.crawler.require_manifesto,
            enrich_limit: config.crawler.enrich_limit,
        },
        now,
    );
    tracing::info!(
        "seller plan: {} to enrich, {} fresh, {} blacklisted, {} over cap",
        seller_plan.to_enrich.len(),
        seller_plan.skipped_fresh.len(),
        seller_plan.skipped_blacklisted.len(),
        seller_plan.over_cap.len()
    );

    // Seller enrichment pool
    let review_cache: HashMap<String, SellerReviewCacheEntry> = stores
        .shared
        .get_json(SELLER_REVIEW_CACHE_KEY)?
        .unwrap_or_default();
    let images: HashMap<String, String> = stores
        .shared
        .get_json(SELLER_IMAGES_KEY)?
        .unwrap_or_default();

    let seller_ctx = Arc::new(SellerContext {
        session,
        stores: Arc::clone(&stores),
        endpoints,
        review_config: ReviewFetchConfig {
            page_size: config.crawler.review_page_size.min(100),
            max_store: config.crawler.max_seller_reviews,
            retries: 3,
            max_age_days: config.crawler.seller_review_max_age_days,
        },
        force_full: config.crawler.force_all,
        review_cache: Arc::new(Mutex::new(review_cache)),
        images: Arc::new(Mutex::new(images)),
    });
    let seller_pool = TaskPool::new(config.crawler.seller_concurrency);
    let seller_outcomes = run_seller_pool(
        seller_ctx,
        seller_plan.to_enrich.clone(),
        &seller_pool,
        now,
    )
    .await;

    let summary = RunSummary {
        started_at,
        finished_at: format_ts(Utc::now()),
        config_hash: config_hash.to_string(),
        unique_ids: worklist.unique_ids.len(),
        to_crawl: worklist.to_crawl.len(),
        already_have: worklist.already_have.len(),
        items_full,
        items_reviews_only: plan.planned.len() - items_full,
        items_complete: item_outcomes.iter().filter(|o| o.is_complete()).count(),
        items_with_failures: item_outcomes.iter().filter(|o| !o.is_complete()).count(),
        index_changed_count: plan.index_changed_count,
        no_full_crawl_count: plan.no_full_crawl_count,
        sellers_enriched: seller_plan.to_enrich.len(),
        sellers_written: seller_outcomes.iter().filter(|o| o.written).count(),
        sellers_failed: seller_outcomes.iter().filter(|o| !o.written).count(),
        sellers_missing_essentials: seller_outcomes
            .iter()
            .filter(|o| !o.missing_essentials.is_empty())
            .count(),
        sellers_skipped_fresh: seller_plan.skipped_fresh.len(),
        sellers_skipped_blacklisted: seller_plan.skipped_blacklisted.len(),
        sellers_over_cap: seller_plan.over_cap.len(),
    };

    let run_key = format!("runs/{}.json", summary.started_at);
    if let Err(e) = stores.shared.put_json(&run_key, &summary) {
        tracing::warn!("failed to record run summary: {}", e);
    }

    Ok(summary)
}

/// Reads every configured market index snapshot
pub fn load_index_snapshots(config: &Config) -> Result<Vec<MarketIndex>, MirrorError> {
    let mut indexes = Vec::with_capacity(config.index.len());
    for entry in &config.index {
        let content =
            std::fs::read_to_string(&entry.path).map_err(|e| MirrorError::IndexSnapshot {
                path: entry.path.clone(),
                message: e.to_string(),
            })?;
        let mut index: MarketIndex =
            serde_json::from_str(&content).map_err(|e| MirrorError::IndexSnapshot {
                path: entry.path.clone(),
                message: e.to_string(),
            })?;
        // The configured market wins over whatever the snapshot claims
        index.market = entry.market.clone();
        indexes.push(index);
    }
    Ok(indexes)
}

/// Ids already present in the shared core store
fn existing_item_ids(stores: &Arc<Stores>) -> Result<HashSet<String>, MirrorError> {
    let keys = stores.shared.list("items/core/")?;
    Ok(keys
        .iter()
        .filter_map(|key| {
            key.strip_prefix("items/core/")
                .and_then(|rest| rest.strip_suffix(".json"))
                .map(|id| id.to_string())
        })
        .collect())
}

/// Seller candidates: the configured list, or every stored seller
fn seller_candidates(config: &Config, stores: &Arc<Stores>) -> Result<Vec<String>, MirrorError> {
    if let Some(path) = &config.sellers.path {
        let content = std::fs::read_to_string(path).map_err(|e| MirrorError::IndexSnapshot {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let ids: Vec<String> =
            serde_json::from_str(&content).map_err(|e| MirrorError::IndexSnapshot {
                path: path.clone(),
                message: e.to_string(),
            })?;
        return Ok(ids);
    }

    let keys = stores.shared.list("sellers/")?;
    Ok(keys
        .iter()
        .filter_map(|key| {
            key.strip_prefix("sellers/")
                .and_then(|rest| rest.strip_suffix(".json"))
                .map(|id| id.to_string())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn test_existing_item_ids_strips_key_decoration() {
        let root = SqliteStore::open_in_memory().unwrap();
        let stores = Arc::new(Stores::from_parts(Arc::new(root), HashMap::new()));
        stores
            .shared
            .put_raw("items/core/a1.json", "{}")
            .unwrap();
        stores
            .shared
            .put_raw("items/core/b2.json", "{}")
            .unwrap();
        stores.shared.put_raw("sellers/s1.json", "{}").unwrap();

        let ids = existing_item_ids(&stores).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a1"));
        assert!(ids.contains("b2"));
    }
}
