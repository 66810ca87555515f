//! Seller enrichment planner
//!
//! One decision ladder, written once against [`SellerStateSource`], with
//! two interchangeable state sources: a durable per-seller store read and
//! a precomputed in-memory aggregate that avoids N store reads during
//! planning.

use crate::records::{parse_ts, seller_key, SellerProfileRecord, SellerState};
use crate::store::{KvStore, KvStoreExt};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Where the planner reads per-seller state from
pub trait SellerStateSource {
    /// Compact state for one seller, or None if never enriched
    fn state_of(&self, seller_id: &str) -> Option<SellerState>;
}

/// Durable path: one store read per seller
pub struct StoreStateSource {
    store: Arc<dyn KvStore>,
}

impl StoreStateSource {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

impl SellerStateSource for StoreStateSource {
    fn state_of(&self, seller_id: &str) -> Option<SellerState> {
        match self
            .store
            .get_json::<SellerProfileRecord>(&seller_key(seller_id))
        {
            Ok(record) => record.map(|r| SellerState::from_profile(&r)),
            Err(e) => {
                tracing::warn!("failed to read seller {} for planning: {}", seller_id, e);
                None
            }
        }
    }
}

/// Fast path: a precomputed aggregate, built once
pub struct AggregateStateSource {
    states: HashMap<String, SellerState>,
}

impl AggregateStateSource {
    pub fn new(states: HashMap<String, SellerState>) -> Self {
        Self { states }
    }

    /// Builds the aggregate by scanning every stored seller record once
    pub fn build(store: &Arc<dyn KvStore>) -> Self {
        let mut states = HashMap::new();
        let keys = match store.list("sellers/") {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("failed to list sellers for aggregate: {}", e);
                Vec::new()
            }
        };
        for key in keys {
            match store.get_json::<SellerProfileRecord>(&key) {
                Ok(Some(record)) => {
                    states.insert(record.seller_id.clone(), SellerState::from_profile(&record));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("failed to read {} for aggregate: {}", key, e),
            }
        }
        Self { states }
    }
}

impl SellerStateSource for AggregateStateSource {
    fn state_of(&self, seller_id: &str) -> Option<SellerState> {
        self.states.get(seller_id).cloned()
    }
}

/// Planner options
#[derive(Debug, Clone)]
pub struct SellerPlanOptions {
    pub blacklist: HashSet<String>,
    /// Enrich every candidate regardless of state (cap still applies)
    pub force_full: bool,
    /// Age after which a seller profile is stale
    pub refresh_days: i64,
    /// Whether a missing manifesto counts as a missing essential field
    pub require_manifesto: bool,
    /// Maximum sellers enriched per run, enforced greedily in iteration
    /// order
    pub enrich_limit: usize,
}

impl Default for SellerPlanOptions {
    fn default() -> Self {
        Self {
            blacklist: HashSet::new(),
            force_full: false,
            refresh_days: 30,
            require_manifesto: false,
            enrich_limit: 100,
        }
    }
}

/// Result of a seller planning pass
#[derive(Debug, Clone, Default)]
pub struct SellerPlan {
    pub to_enrich: Vec<String>,
    pub skipped_fresh: Vec<String>,
    pub skipped_blacklisted: Vec<String>,
    /// Sellers that needed enrichment but fell past the cap
    pub over_cap: Vec<String>,
}

/// Decides which sellers need re-enrichment
///
/// Per candidate, first match wins: blacklisted - skip; `force_full` -
/// enrich; never enriched - enrich; stale or missing an essential field
/// (image, share, optionally manifesto) - enrich; otherwise fresh. The
/// enrichment list is capped greedily in iteration order, not by priority.
pub fn plan_sellers(
    source: &dyn SellerStateSource,
    candidates: &[String],
    opts: &SellerPlanOptions,
    now: DateTime<Utc>,
) -> SellerPlan {
    let mut plan = SellerPlan::default();
    let refresh_window = Duration::days(opts.refresh_days);

    for seller_id in candidates {
        if opts.blacklist.contains(seller_id) {
            plan.skipped_blacklisted.push(seller_id.clone());
            continue;
        }

        let wants_enrich = if opts.force_full {
            true
        } else {
            match source.state_of(seller_id) {
                None => true,
                Some(state) => {
                    let stale = match state.last_enriched_at.as_deref().and_then(parse_ts) {
                        Some(ts) => now - ts > refresh_window,
                        None => true,
                    };
                    let essential_missing = !state.has_image
                        || !state.has_share
                        || (opts.require_manifesto && !state.has_manifesto);
                    stale || essential_missing
                }
            }
        };

        if !wants_enrich {
            plan.skipped_fresh.push(seller_id.clone());
        } else if plan.to_enrich.len() < opts.enrich_limit {
            plan.to_enrich.push(seller_id.clone());
        } else {
            plan.over_cap.push(seller_id.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::format_ts;

    fn fresh_state() -> SellerState {
        SellerState {
            last_enriched_at: Some(format_ts(Utc::now())),
            has_image: true,
            has_share: true,
            has_manifesto: true,
            has_reviews: true,
            review_count: 10,
        }
    }

    fn source_with(states: &[(&str, SellerState)]) -> AggregateStateSource {
        AggregateStateSource::new(
            states
                .iter()
                .map(|(id, s)| (id.to_string(), s.clone()))
                .collect(),
        )
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unknown_seller_always_selected() {
        let source = source_with(&[]);
        let plan = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions::default(),
            Utc::now(),
        );
        assert_eq!(plan.to_enrich, vec!["s1"]);
    }

    #[test]
    fn test_fresh_complete_seller_skipped() {
        let source = source_with(&[("s1", fresh_state())]);
        let plan = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions::default(),
            Utc::now(),
        );
        assert!(plan.to_enrich.is_empty());
        assert_eq!(plan.skipped_fresh, vec!["s1"]);
    }

    #[test]
    fn test_missing_share_selected_despite_freshness() {
        let mut state = fresh_state();
        state.has_share = false;
        let source = source_with(&[("s1", state)]);

        let plan = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions::default(),
            Utc::now(),
        );
        assert_eq!(plan.to_enrich, vec!["s1"]);
    }

    #[test]
    fn test_manifesto_only_essential_when_required() {
        let mut state = fresh_state();
        state.has_manifesto = false;
        let source = source_with(&[("s1", state)]);

        let relaxed = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions::default(),
            Utc::now(),
        );
        assert!(relaxed.to_enrich.is_empty());

        let strict = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions {
                require_manifesto: true,
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(strict.to_enrich, vec!["s1"]);
    }

    #[test]
    fn test_stale_seller_selected() {
        let mut state = fresh_state();
        state.last_enriched_at = Some(format_ts(Utc::now() - Duration::days(31)));
        let source = source_with(&[("s1", state)]);

        let plan = plan_sellers(
            &source,
            &ids(&["s1"]),
            &SellerPlanOptions::default(),
            Utc::now(),
        );
        assert_eq!(plan.to_enrich, vec!["s1"]);
    }

    #[test]
    fn test_blacklist_wins_over_force_full() {
        let source = source_with(&[]);
        let plan = plan_sellers(
            &source,
            &ids(&["s1", "s2"]),
            &SellerPlanOptions {
                blacklist: ["s1".to_string()].into_iter().collect(),
                force_full: true,
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(plan.skipped_blacklisted, vec!["s1"]);
        assert_eq!(plan.to_enrich, vec!["s2"]);
    }

    #[test]
    fn test_cap_enforced_in_iteration_order() {
        let source = source_with(&[]);
        let plan = plan_sellers(
            &source,
            &ids(&["s1", "s2", "s3"]),
            &SellerPlanOptions {
                enrich_limit: 2,
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(plan.to_enrich, vec!["s1", "s2"]);
        assert_eq!(plan.over_cap, vec!["s3"]);
    }

    #[test]
    fn test_both_sources_agree() {
        use crate::store::SqliteStore;

        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let record = SellerProfileRecord {
            seller_id: "s1".to_string(),
            image_url: Some("https://img".to_string()),
            share: Some("https://share".to_string()),
            last_enriched_at: Some(format_ts(Utc::now())),
            ..Default::default()
        };
        store.put_json(&seller_key("s1"), &record).unwrap();

        let durable = StoreStateSource::new(Arc::clone(&store));
        let aggregate = AggregateStateSource::build(&store);

        let opts = SellerPlanOptions::default();
        let now = Utc::now();
        let from_store = plan_sellers(&durable, &ids(&["s1", "s2"]), &opts, now);
        let from_aggregate = plan_sellers(&aggregate, &ids(&["s1", "s2"]), &opts, now);

        assert_eq!(from_store.to_enrich, from_aggregate.to_enrich);
        assert_eq!(from_store.skipped_fresh, from_aggregate.skipped_fresh);
    }
}
