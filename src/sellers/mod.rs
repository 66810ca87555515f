//! Seller enrichment
//!
//! Plans which sellers need re-enrichment, then runs a bounded worker pool
//! that fetches profile pages with escalating timeout tiers, extracts
//! profile fields, pages through reviews with a skip-optimization cache,
//! and merges everything into the stored profile records.

mod pipeline;
mod planner;
mod reviews;

pub use pipeline::{
    enrich_seller, profile_attempt_specs, run_seller_pool, SellerContext, SellerOutcome,
};
pub use planner::{
    plan_sellers, AggregateStateSource, SellerPlan, SellerPlanOptions, SellerStateSource,
    StoreStateSource,
};
pub use reviews::{
    fetch_seller_reviews_paged, should_skip_full_fetch, update_review_cache, ReviewFetchConfig,
    ReviewFetchMode, SellerReviewsOutcome, PEEK_PAGE_SIZE,
};

/// Site path of a seller profile page
pub fn seller_path(id: &str) -> String {
    format!("/seller/{id}")
}

/// Site path of the seller reviews endpoint
pub fn seller_reviews_path(id: &str, limit: usize, offset: usize) -> String {
    format!("/api/sellers/{id}/reviews?limit={limit}&offset={offset}")
}

/// Site path of the seller summary endpoint
pub fn seller_summary_path(id: &str) -> String {
    format!("/api/sellers/{id}/summary")
}

/// Site path of the seller share-link endpoint
pub fn seller_share_path(id: &str) -> String {
    format!("/api/sellers/{id}/share")
}
