//! Seller enrichment pipeline
//!
//! A bounded worker pool fetches seller profile pages through escalating
//! timeout/byte-budget tiers, extracts profile fields with fallbacks, pages
//! through reviews, and merges everything into the stored record. Each
//! seller's work is isolated: one failure never aborts the batch.

use crate::config::SiteEndpoints;
use crate::fetch::{fetch_capped, fetch_with_escalation, AttemptSpec};
use crate::parsers::{parse_manifesto, parse_seller_meta, scan_seller_meta_text};
use crate::pool::TaskPool;
use crate::records::{
    format_ts, seller_key, SellerProfileRecord, SellerReviewCacheEntry, SellerStats,
    SELLER_IMAGES_KEY, SELLER_REVIEW_CACHE_KEY,
};
use crate::sellers::reviews::{fetch_seller_reviews_paged, update_review_cache, ReviewFetchConfig};
use crate::sellers::{seller_path, seller_share_path, seller_summary_path};
use crate::session::SessionManager;
use crate::store::{KvStoreExt, Stores};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);
const MANIFESTO_RETRY_TIMEOUT: Duration = Duration::from_secs(45);

/// Escalating fetch tiers for seller profile pages
///
/// Tier budgets grow while the host list stays fixed: primary first, then
/// the alternates raced in parallel.
pub fn profile_attempt_specs(endpoints: &SiteEndpoints) -> Vec<AttemptSpec> {
    let hosts = endpoints.fetch_hosts();
    vec![
        AttemptSpec {
            timeout: Duration::from_secs(8),
            max_bytes: Some(64 * 1024),
            hosts: hosts.clone(),
        },
        AttemptSpec {
            timeout: Duration::from_secs(20),
            max_bytes: Some(256 * 1024),
            hosts: hosts.clone(),
        },
        AttemptSpec {
            timeout: Duration::from_secs(45),
            max_bytes: None,
            hosts,
        },
    ]
}

/// Everything a per-seller task needs, shared across the pool
pub struct SellerContext {
    pub session: Arc<SessionManager>,
    pub stores: Arc<Stores>,
    pub endpoints: SiteEndpoints,
    pub review_config: ReviewFetchConfig,
    /// Refetch the share link even when one is stored
    pub force_full: bool,
    /// Review cache aggregate: loaded once, flushed after the pool drains
    pub review_cache: Arc<Mutex<HashMap<String, SellerReviewCacheEntry>>>,
    /// Seller images aggregate: same lifecycle as the review cache
    pub images: Arc<Mutex<HashMap<String, String>>>,
}

/// What happened to one seller's enrichment
#[derive(Debug, Clone)]
pub struct SellerOutcome {
    pub seller_id: String,
    pub written: bool,
    /// Essential fields still missing after the merge
    pub missing_essentials: Vec<&'static str>,
    pub reviews_fetched: bool,
}

#[derive(Debug, Deserialize)]
struct ShareResponse {
    share: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: Option<String>,
    statistics: Option<SellerStats>,
}

/// Enriches one seller
///
/// The extraction steps run sequentially against one fetched profile page;
/// the record is written exactly once, after every sub-step finished or
/// was skipped. A total page-fetch failure aborts this seller only.
pub async fn enrich_seller(
    ctx: &SellerContext,
    seller_id: &str,
    now: DateTime<Utc>,
) -> SellerOutcome {
    let mut outcome = SellerOutcome {
        seller_id: seller_id.to_string(),
        written: false,
        missing_essentials: Vec::new(),
        reviews_fetched: false,
    };

    let key = seller_key(seller_id);
    let existing: SellerProfileRecord = match ctx.stores.shared.get_json(&key) {
        Ok(Some(record)) => record,
        Ok(None) => SellerProfileRecord {
            seller_id: seller_id.to_string(),
            ..Default::default()
        },
        Err(e) => {
            tracing::warn!("failed to read seller record {}: {}", seller_id, e);
            SellerProfileRecord {
                seller_id: seller_id.to_string(),
                ..Default::default()
            }
        }
    };

    // 1. Page fetch with escalation
    let specs = profile_attempt_specs(&ctx.endpoints);
    let page = match fetch_with_escalation(ctx.session.client(), &seller_path(seller_id), &specs)
        .await
    {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("profile fetch failed for seller {}: {}", seller_id, e);
            return outcome;
        }
    };

    // 2. Field extraction, with the text-scan heuristic as fallback
    let mut meta = parse_seller_meta(&page);
    if meta.online.is_none() && meta.joined.is_none() {
        let scanned = scan_seller_meta_text(&page);
        meta.online = scanned.online;
        meta.joined = meta.joined.or(scanned.joined);
    }

    let mut manifesto = parse_manifesto(&page);
    if manifesto.is_none() {
        manifesto = refetch_manifesto(ctx, seller_id).await;
    }

    // 3. Share link: reuse unless absent or forced
    let share = if existing.share.is_some() && !ctx.force_full {
        existing.share.clone()
    } else {
        fetch_share(ctx, seller_id).await
    };

    // 4. Summary and statistics
    let summary = fetch_summary(ctx, seller_id).await;

    // 5. Reviews with the skip-optimization cache
    let cached_entry = {
        let cache = ctx.review_cache.lock().unwrap();
        cache.get(seller_id).cloned()
    };
    let reviews = match fetch_seller_reviews_paged(
        ctx.session.client(),
        &ctx.endpoints.fetch_hosts(),
        seller_id,
        cached_entry.as_ref(),
        &existing.reviews,
        &ctx.review_config,
        now,
    )
    .await
    {
        Ok(result) => {
            outcome.reviews_fetched = true;
            let mut cache = ctx.review_cache.lock().unwrap();
            update_review_cache(&mut cache, seller_id, &result.reviews, now);
            Some(result.reviews)
        }
        Err(e) => {
            tracing::warn!("review fetch failed for seller {}: {}", seller_id, e);
            None
        }
    };

    // 6. Merge and persist once
    let mut record = existing;
    record.image_url = meta.image_url.or(record.image_url);
    record.online = meta.online.or(record.online);
    record.joined = meta.joined.or(record.joined);
    record.manifesto = manifesto.or(record.manifesto);
    record.share = share.or(record.share);
    if let Some(summary) = summary {
        record.summary = summary.summary.or(record.summary);
        record.statistics = summary.statistics.or(record.statistics);
    }
    if let Some(reviews) = reviews {
        record.reviews = reviews;
    }
    record.last_enriched_at = Some(format_ts(now));

    if record.image_url.is_none() {
        outcome.missing_essentials.push("image");
    }
    if record.share.is_none() {
        outcome.missing_essentials.push("share");
    }
    if record.manifesto.is_none() {
        outcome.missing_essentials.push("manifesto");
    }
    if record.reviews.is_empty() {
        outcome.missing_essentials.push("reviews");
    }

    if let Some(image_url) = &record.image_url {
        let mut images = ctx.images.lock().unwrap();
        images.insert(seller_id.to_string(), image_url.clone());
    }

    match ctx.stores.shared.put_json(&key, &record) {
        Ok(()) => outcome.written = true,
        Err(e) => {
            tracing::warn!("failed to write seller record {}: {}", seller_id, e);
        }
    }

    outcome
}

/// Runs the seller pool, then flushes the images and review-cache
/// aggregates once
pub async fn run_seller_pool(
    ctx: Arc<SellerContext>,
    seller_ids: Vec<String>,
    pool: &TaskPool,
    now: DateTime<Utc>,
) -> Vec<SellerOutcome> {
    let tasks: Vec<_> = seller_ids
        .into_iter()
        .map(|seller_id| {
            let ctx = Arc::clone(&ctx);
            async move { enrich_seller(&ctx, &seller_id, now).await }
        })
        .collect();

    let outcomes: Vec<SellerOutcome> =
        pool.run_all(tasks).await.into_iter().flatten().collect();

    flush_aggregates(&ctx);

    outcomes
}

/// Writes both seller aggregates back to the store
fn flush_aggregates(ctx: &SellerContext) {
    let cache = ctx.review_cache.lock().unwrap().clone();
    if let Err(e) = ctx.stores.shared.put_json(SELLER_REVIEW_CACHE_KEY, &cache) {
        tracing::warn!("failed to flush seller review cache: {}", e);
    }

    let images = ctx.images.lock().unwrap().clone();
    if let Err(e) = ctx.stores.shared.put_json(SELLER_IMAGES_KEY, &images) {
        tracing::warn!("failed to flush seller images aggregate: {}", e);
    }
}

/// One extra high-budget fetch when the manifesto came back empty
async fn refetch_manifesto(ctx: &SellerContext, seller_id: &str) -> Option<String> {
    let url = format!("{}{}", ctx.endpoints.primary, seller_path(seller_id));
    match fetch_capped(ctx.session.client(), &url, MANIFESTO_RETRY_TIMEOUT, None).await {
        Ok(body) => parse_manifesto(&body),
        Err(e) => {
            tracing::debug!("manifesto retry fetch failed for {}: {}", seller_id, e);
            None
        }
    }
}

async fn fetch_share(ctx: &SellerContext, seller_id: &str) -> Option<String> {
    let url = format!("{}{}", ctx.endpoints.primary, seller_share_path(seller_id));
    match get_json_endpoint::<ShareResponse>(ctx, &url).await {
        Some(response) => response.share,
        None => None,
    }
}

async fn fetch_summary(ctx: &SellerContext, seller_id: &str) -> Option<SummaryResponse> {
    let url = format!("{}{}", ctx.endpoints.primary, seller_summary_path(seller_id));
    get_json_endpoint(ctx, &url).await
}

async fn get_json_endpoint<T: serde::de::DeserializeOwned>(
    ctx: &SellerContext,
    url: &str,
) -> Option<T> {
    let response = match ctx
        .session
        .client()
        .get(url)
        .timeout(ENDPOINT_TIMEOUT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("endpoint call failed for {}: {}", url, e);
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!("endpoint {} returned HTTP {}", url, response.status().as_u16());
        return None;
    }

    match response.json().await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("endpoint payload for {} did not parse: {}", url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_context(base: &str) -> SellerContext {
        let root = SqliteStore::open_in_memory().unwrap();
        let stores = Arc::new(Stores::from_parts(Arc::new(root), HashMap::new()));

        SellerContext {
            session: Arc::new(SessionManager::anonymous().unwrap()),
            stores,
            endpoints: SiteEndpoints {
                primary: base.to_string(),
                www_variant: base.to_string(),
                alternates: vec![],
                location_tokens: HashMap::new(),
            },
            review_config: ReviewFetchConfig {
                retries: 1,
                ..Default::default()
            },
            force_full: false,
            review_cache: Arc::new(Mutex::new(HashMap::new())),
            images: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn profile_page() -> String {
        format!(
            r#"<html><body>{}
            <img class="seller-avatar" src="https://cdn.example/s1.png">
            <span class="seller-status">Online</span>
            <span class="seller-joined">Joined: 2024</span>
            <div class="seller-manifesto">Ships fast.</div>
            </body></html>"#,
            " ".repeat(600)
        )
    }

    async fn mount_happy_seller(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(profile_page()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sellers/s1/share"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"share": "https://share/s1"})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sellers/s1/summary"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": "Reliable seller",
                "statistics": {"sales": 120, "rating": 4.9, "disputes": 1}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sellers/s1/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "r1", "rating": 5.0, "body": "great", "created": "2026-01-01T00:00:00Z"}
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_enrich_seller_merges_all_fields() {
        let server = MockServer::start().await;
        mount_happy_seller(&server).await;

        let ctx = test_context(&server.uri());
        let outcome = enrich_seller(&ctx, "s1", Utc::now()).await;

        assert!(outcome.written);
        assert!(outcome.missing_essentials.is_empty());
        assert!(outcome.reviews_fetched);

        let record: SellerProfileRecord = ctx
            .stores
            .shared
            .get_json(&seller_key("s1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.example/s1.png"));
        assert_eq!(record.online, Some(true));
        assert_eq!(record.share.as_deref(), Some("https://share/s1"));
        assert_eq!(record.manifesto.as_deref(), Some("Ships fast."));
        assert_eq!(record.summary.as_deref(), Some("Reliable seller"));
        assert_eq!(record.reviews.len(), 1);
        assert!(record.last_enriched_at.is_some());

        let images = ctx.images.lock().unwrap();
        assert_eq!(
            images.get("s1").map(String::as_str),
            Some("https://cdn.example/s1.png")
        );
    }

    #[tokio::test]
    async fn test_missing_fields_do_not_erase_stored_values() {
        let server = MockServer::start().await;
        // Page without avatar or manifesto
        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><body>{}<span class=\"seller-status\">Online</span></body></html>",
                " ".repeat(600)
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sellers/s1/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let ctx = test_context(&server.uri());
        let stored = SellerProfileRecord {
            seller_id: "s1".to_string(),
            image_url: Some("https://cdn.example/old.png".to_string()),
            share: Some("https://share/old".to_string()),
            manifesto: Some("Old manifesto".to_string()),
            ..Default::default()
        };
        ctx.stores
            .shared
            .put_json(&seller_key("s1"), &stored)
            .unwrap();

        let outcome = enrich_seller(&ctx, "s1", Utc::now()).await;
        assert!(outcome.written);

        let record: SellerProfileRecord = ctx
            .stores
            .shared
            .get_json(&seller_key("s1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.image_url.as_deref(), Some("https://cdn.example/old.png"));
        assert_eq!(record.share.as_deref(), Some("https://share/old"));
        assert_eq!(record.manifesto.as_deref(), Some("Old manifesto"));
    }

    #[tokio::test]
    async fn test_page_fetch_failure_aborts_only_that_seller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seller/bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_happy_seller(&server).await;

        let ctx = Arc::new(test_context(&server.uri()));
        let pool = TaskPool::new(2);
        let outcomes = run_seller_pool(
            Arc::clone(&ctx),
            vec!["bad".to_string(), "s1".to_string()],
            &pool,
            Utc::now(),
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        let bad = outcomes.iter().find(|o| o.seller_id == "bad").unwrap();
        let good = outcomes.iter().find(|o| o.seller_id == "s1").unwrap();
        assert!(!bad.written);
        assert!(good.written);

        // Aggregates flushed once after the pool drained
        let cache: Option<HashMap<String, SellerReviewCacheEntry>> =
            ctx.stores.shared.get_json(SELLER_REVIEW_CACHE_KEY).unwrap();
        assert!(cache.unwrap().contains_key("s1"));
    }

    #[tokio::test]
    async fn test_share_reused_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seller/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(profile_page()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sellers/s1/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        // No share endpoint mocked: a fetch attempt would 404 and the
        // stored value would be lost if reuse were broken
        let ctx = test_context(&server.uri());
        let stored = SellerProfileRecord {
            seller_id: "s1".to_string(),
            share: Some("https://share/keep".to_string()),
            ..Default::default()
        };
        ctx.stores
            .shared
            .put_json(&seller_key("s1"), &stored)
            .unwrap();

        enrich_seller(&ctx, "s1", Utc::now()).await;

        let record: SellerProfileRecord = ctx
            .stores
            .shared
            .get_json(&seller_key("s1"))
            .unwrap()
            .unwrap();
        assert_eq!(record.share.as_deref(), Some("https://share/keep"));
    }
}
