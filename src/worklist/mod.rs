//! Worklist builder
//!
//! Merges per-market item indexes into one deduplicated worklist with
//! market-presence tracking, partitioned by what already exists in the
//! shared store. Pure: no network or store access, deterministic given its
//! inputs.

use crate::records::{MarketIndex, WorkItem, Worklist};
use std::collections::{HashMap, HashSet};

/// Builds the run's worklist from market index snapshots
///
/// Ids are trimmed and empty ids dropped. Every id ends up in exactly one
/// of `to_crawl` / `already_have`, each carrying the set of markets it was
/// observed in. Runs in O(total items across markets).
pub fn build_worklist(indexes: &[MarketIndex], existing: &HashSet<String>) -> Worklist {
    let mut order: Vec<String> = Vec::new();
    let mut presence: HashMap<String, Vec<String>> = HashMap::new();

    for index in indexes {
        for raw in &index.items {
            let id = raw.trim();
            if id.is_empty() {
                continue;
            }
            let markets = presence.entry(id.to_string()).or_insert_with(|| {
                order.push(id.to_string());
                Vec::new()
            });
            if !markets.iter().any(|m| m == &index.market) {
                markets.push(index.market.clone());
            }
        }
    }

    let mut to_crawl = Vec::new();
    let mut already_have = Vec::new();
    for id in &order {
        let markets = presence.get(id).cloned().unwrap_or_default();
        let item = WorkItem {
            id: id.clone(),
            markets,
        };
        if existing.contains(id) {
            already_have.push(item);
        } else {
            to_crawl.push(item);
        }
    }

    Worklist {
        unique_ids: order,
        to_crawl,
        already_have,
    }
}

/// Collects the presence map (id -> markets) from a built worklist
pub fn presence_map(worklist: &Worklist) -> HashMap<String, Vec<String>> {
    worklist
        .to_crawl
        .iter()
        .chain(worklist.already_have.iter())
        .map(|item| (item.id.clone(), item.markets.clone()))
        .collect()
}

/// Merges the per-item index "last updated" tokens from every snapshot
///
/// When two markets disagree, the newest token wins (tokens are
/// ISO-datetime-like and compare lexicographically).
pub fn merge_index_tokens(indexes: &[MarketIndex]) -> HashMap<String, String> {
    let mut tokens: HashMap<String, String> = HashMap::new();
    for index in indexes {
        for (id, lua) in &index.updated {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            match tokens.get(id) {
                Some(existing) if existing.as_str() >= lua.as_str() => {}
                _ => {
                    tokens.insert(id.to_string(), lua.clone());
                }
            }
        }
    }
    tokens
}
