//! Seller review paging and the skip-optimization cache
//!
//! Reviews are fetched in offset pages until enough are stored or the
//! endpoint runs dry. Before paying for a full paged fetch, a small peek
//! page is compared against the per-seller "newest review seen" watermark;
//! an unchanged review set within the cache window skips the full fetch.

use crate::fetch::{classify_reqwest_error, FetchError};
use crate::records::{format_ts, parse_ts, SellerReview, SellerReviewCacheEntry};
use crate::sellers::seller_reviews_path;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;

/// Size of the peek page used to test the watermark
pub const PEEK_PAGE_SIZE: usize = 20;

const PAGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
const BACKOFF_STEP_MS: u64 = 500;

/// Paged-fetch tuning
#[derive(Debug, Clone)]
pub struct ReviewFetchConfig {
    pub page_size: usize,
    /// Stop once this many reviews are collected
    pub max_store: usize,
    /// Per-page attempts (5xx/network only; 4xx never retries)
    pub retries: u32,
    /// Cache entries older than this cannot skip a fetch
    pub max_age_days: i64,
}

impl Default for ReviewFetchConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_store: 250,
            retries: 3,
            max_age_days: 2,
        }
    }
}

/// How a seller's reviews were obtained this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFetchMode {
    /// Watermark unchanged: peeked page merged with stored reviews
    Peek,
    /// Full paged fetch
    Paged,
}

/// Reviews plus the mode that produced them
#[derive(Debug)]
pub struct SellerReviewsOutcome {
    pub reviews: Vec<SellerReview>,
    pub mode: ReviewFetchMode,
}

/// Whether the peeked page allows skipping the full fetch
///
/// Requires a cache entry updated within `max_age_days` whose watermark is
/// at least as new as the peeked newest review. A stale cache always
/// refetches, whatever the peek shows.
pub fn should_skip_full_fetch(
    cache: Option<&SellerReviewCacheEntry>,
    peeked_newest: Option<&str>,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> bool {
    let Some(cache) = cache else {
        return false;
    };

    let fresh = match parse_ts(&cache.updated_at) {
        Some(updated) => now - updated <= Duration::days(max_age_days),
        None => false,
    };
    if !fresh {
        return false;
    }

    match (peeked_newest, cache.newest_review_created.as_deref()) {
        (Some(peeked), Some(watermark)) => peeked <= watermark,
        // Nothing peeked means nothing newer
        (None, _) => true,
        (Some(_), None) => false,
    }
}

/// Fetches a seller's reviews, peeking first to skip unchanged sets
///
/// `stored` is the previously persisted review list, reused on a skip.
pub async fn fetch_seller_reviews_paged(
    client: &Client,
    hosts: &[String],
    seller_id: &str,
    cache: Option<&SellerReviewCacheEntry>,
    stored: &[SellerReview],
    config: &ReviewFetchConfig,
    now: DateTime<Utc>,
) -> Result<SellerReviewsOutcome, FetchError> {
    let peek = fetch_page(client, hosts, seller_id, PEEK_PAGE_SIZE, 0, config.retries).await?;
    let peeked_newest = newest_created(&peek);

    if should_skip_full_fetch(cache, peeked_newest.as_deref(), config.max_age_days, now) {
        tracing::debug!("review watermark unchanged for seller {}, skipping", seller_id);
        let mut reviews = peek;
        merge_reviews(&mut reviews, stored, config.max_store);
        return Ok(SellerReviewsOutcome {
            reviews,
            mode: ReviewFetchMode::Peek,
        });
    }

    let mut reviews: Vec<SellerReview> = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch_page(
            client,
            hosts,
            seller_id,
            config.page_size,
            offset,
            config.retries,
        )
        .await?;
        let page_len = page.len();
        merge_reviews(&mut reviews, &page, config.max_store);

        if reviews.len() >= config.max_store || page_len < config.page_size || page_len == 0 {
            break;
        }
        offset += config.page_size;
    }

    Ok(SellerReviewsOutcome {
        reviews,
        mode: ReviewFetchMode::Paged,
    })
}

/// Stamps the cache after a fetch (peek or paged)
///
/// `updated_at` always moves to now; the watermark only moves forward.
pub fn update_review_cache(
    cache: &mut HashMap<String, SellerReviewCacheEntry>,
    seller_id: &str,
    reviews: &[SellerReview],
    now: DateTime<Utc>,
) {
    let newest = reviews
        .iter()
        .filter(|r| r.created.is_some())
        .max_by(|a, b| a.created.cmp(&b.created));

    let entry = cache
        .entry(seller_id.to_string())
        .or_insert_with(|| SellerReviewCacheEntry {
            newest_review_created: None,
            newest_review_id: None,
            updated_at: format_ts(now),
        });
    entry.updated_at = format_ts(now);

    if let Some(newest) = newest {
        let advances = match (&newest.created, &entry.newest_review_created) {
            (Some(candidate), Some(current)) => candidate > current,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if advances {
            entry.newest_review_created = newest.created.clone();
            entry.newest_review_id = Some(newest.id.clone());
        }
    }
}

fn newest_created(reviews: &[SellerReview]) -> Option<String> {
    reviews
        .iter()
        .filter_map(|r| r.created.clone())
        .max()
}

/// Appends `incoming` to `reviews`, deduplicating by id and capping at
/// `max_store`
fn merge_reviews(reviews: &mut Vec<SellerReview>, incoming: &[SellerReview], max_store: usize) {
    for review in incoming {
        if reviews.len() >= max_store {
            break;
        }
        if !reviews.iter().any(|r| r.id == review.id) {
            reviews.push(review.clone());
        }
    }
    reviews.truncate(max_store);
}

/// Fetches one review page, retrying 5xx/network failures across two hosts
/// with linear backoff; 4xx responses fail immediately
async fn fetch_page(
    client: &Client,
    hosts: &[String],
    seller_id: &str,
    limit: usize,
    offset: usize,
    retries: u32,
) -> Result<Vec<SellerReview>, FetchError> {
    let path = seller_reviews_path(seller_id, limit, offset);
    let mut last_error = FetchError::AllTiersFailed { path: path.clone() };

    for attempt in 1..=retries.max(1) {
        for host in hosts.iter().take(2) {
            let url = format!("{host}{path}");
            let response = match client.get(&url).timeout(PAGE_TIMEOUT).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = classify_reqwest_error(&url, e);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                match response.json::<Vec<SellerReview>>().await {
                    Ok(page) => return Ok(page),
                    Err(e) => {
                        last_error = FetchError::Network {
                            url: url.clone(),
                            message: format!("review payload did not parse: {e}"),
                        };
                        continue;
                    }
                }
            }

            let error = FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            };
            if !error.is_retryable() {
                return Err(error);
            }
            last_error = error;
        }

        if attempt < retries.max(1) {
            let backoff =
                std::time::Duration::from_millis(BACKOFF_STEP_MS * u64::from(attempt));
            tokio::time::sleep(backoff).await;
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(id: &str, created: &str) -> SellerReview {
        SellerReview {
            id: id.to_string(),
            rating: Some(5.0),
            body: None,
            created: Some(created.to_string()),
        }
    }

    fn cache_entry(watermark: &str, updated: DateTime<Utc>) -> SellerReviewCacheEntry {
        SellerReviewCacheEntry {
            newest_review_created: Some(watermark.to_string()),
            newest_review_id: Some("r".to_string()),
            updated_at: format_ts(updated),
        }
    }

    #[test]
    fn test_skip_when_watermark_unchanged() {
        let now = Utc::now();
        let cache = cache_entry("100", now);
        assert!(should_skip_full_fetch(Some(&cache), Some("100"), 2, now));
    }

    #[test]
    fn test_no_skip_when_newer_review_peeked() {
        let now = Utc::now();
        let cache = cache_entry("100", now);
        assert!(!should_skip_full_fetch(Some(&cache), Some("101"), 2, now));
    }

    #[test]
    fn test_stale_cache_always_refetches() {
        let now = Utc::now();
        let cache = cache_entry("100", now - Duration::days(3));
        assert!(!should_skip_full_fetch(Some(&cache), Some("100"), 2, now));
        assert!(!should_skip_full_fetch(Some(&cache), Some("099"), 2, now));
    }

    #[test]
    fn test_no_cache_never_skips() {
        let now = Utc::now();
        assert!(!should_skip_full_fetch(None, Some("100"), 2, now));
    }

    #[test]
    fn test_empty_peek_with_fresh_cache_skips() {
        let now = Utc::now();
        let cache = cache_entry("100", now);
        assert!(should_skip_full_fetch(Some(&cache), None, 2, now));
    }

    #[test]
    fn test_update_cache_watermark_is_monotonic() {
        let now = Utc::now();
        let mut cache = HashMap::new();

        update_review_cache(&mut cache, "s1", &[review("r1", "100")], now);
        assert_eq!(
            cache.get("s1").unwrap().newest_review_created.as_deref(),
            Some("100")
        );

        // Older reviews do not move the watermark back
        update_review_cache(&mut cache, "s1", &[review("r0", "050")], now);
        let entry = cache.get("s1").unwrap();
        assert_eq!(entry.newest_review_created.as_deref(), Some("100"));
        assert_eq!(entry.newest_review_id.as_deref(), Some("r1"));

        update_review_cache(&mut cache, "s1", &[review("r2", "120")], now);
        assert_eq!(
            cache.get("s1").unwrap().newest_review_created.as_deref(),
            Some("120")
        );
    }

    #[test]
    fn test_merge_reviews_dedupes_and_caps() {
        let mut reviews = vec![review("r1", "100")];
        merge_reviews(
            &mut reviews,
            &[review("r1", "100"), review("r2", "090"), review("r3", "080")],
            2,
        );
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].id, "r1");
        assert_eq!(reviews[1].id, "r2");
    }

    mod paged {
        use super::*;
        use wiremock::matchers::{method, path_regex, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn reviews_json(ids: &[(&str, &str)]) -> serde_json::Value {
            serde_json::Value::Array(
                ids.iter()
                    .map(|(id, created)| {
                        serde_json::json!({
                            "id": id, "rating": 4.0, "body": null, "created": created
                        })
                    })
                    .collect(),
            )
        }

        #[tokio::test]
        async fn test_paged_fetch_stops_on_short_page() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .and(query_param("offset", "0"))
                .and(query_param("limit", "20"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(reviews_json(&[("p1", "300")])),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .and(query_param("offset", "0"))
                .and(query_param("limit", "2"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(reviews_json(&[("r1", "300"), ("r2", "290")])),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .and(query_param("offset", "2"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(reviews_json(&[("r3", "280")])),
                )
                .mount(&server)
                .await;

            let client = Client::new();
            let config = ReviewFetchConfig {
                page_size: 2,
                max_store: 100,
                retries: 1,
                max_age_days: 2,
            };
            let outcome = fetch_seller_reviews_paged(
                &client,
                &[server.uri()],
                "s1",
                None,
                &[],
                &config,
                Utc::now(),
            )
            .await
            .unwrap();

            assert_eq!(outcome.mode, ReviewFetchMode::Paged);
            assert_eq!(outcome.reviews.len(), 3);
        }

        #[tokio::test]
        async fn test_peek_skip_reuses_stored_reviews() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(reviews_json(&[("r9", "300")])),
                )
                .mount(&server)
                .await;

            let now = Utc::now();
            let cache = cache_entry("300", now);
            let stored = vec![review("r8", "290"), review("r7", "280")];

            let client = Client::new();
            let outcome = fetch_seller_reviews_paged(
                &client,
                &[server.uri()],
                "s1",
                Some(&cache),
                &stored,
                &ReviewFetchConfig::default(),
                now,
            )
            .await
            .unwrap();

            assert_eq!(outcome.mode, ReviewFetchMode::Peek);
            assert_eq!(outcome.reviews.len(), 3);
        }

        #[tokio::test]
        async fn test_5xx_retries_then_succeeds() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(reviews_json(&[("r1", "100")])),
                )
                .mount(&server)
                .await;

            let client = Client::new();
            let config = ReviewFetchConfig {
                retries: 2,
                ..Default::default()
            };
            let outcome = fetch_seller_reviews_paged(
                &client,
                &[server.uri()],
                "s1",
                None,
                &[],
                &config,
                Utc::now(),
            )
            .await
            .unwrap();

            assert_eq!(outcome.mode, ReviewFetchMode::Paged);
            assert_eq!(outcome.reviews.len(), 1);
        }

        #[tokio::test]
        async fn test_4xx_fails_without_retry() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/api/sellers/s1/reviews$"))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;

            let client = Client::new();
            let config = ReviewFetchConfig {
                retries: 3,
                ..Default::default()
            };
            let result = fetch_seller_reviews_paged(
                &client,
                &[server.uri()],
                "s1",
                None,
                &[],
                &config,
                Utc::now(),
            )
            .await;

            assert!(matches!(
                result,
                Err(FetchError::Status { status: 404, .. })
            ));
        }
    }
}
