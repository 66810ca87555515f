//! Key-value store for mirror records
//!
//! All mirror data lives in a namespaced JSON blob store: one namespace for
//! shared records (item cores, sellers, aggregates, session state) and one
//! per market for shipping snapshots. The store is consumed through the
//! narrow [`KvStore`] contract so backends can be swapped.
//!
//! Concurrency note: records are read-merge-write documents with no
//! versioning. Within a run each id is processed by exactly one task, so
//! writers never race; concurrent overlapping *runs* are unsupported and
//! would be last-write-wins.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{KvStore, KvStoreExt, StoreError, StoreResult};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The shared store plus one namespaced store per market
pub struct Stores {
    /// Market-independent records: `items/core/`, `sellers/`, `aggregates/`
    pub shared: Arc<dyn KvStore>,
    markets: HashMap<String, Arc<dyn KvStore>>,
}

impl Stores {
    /// Opens the backing database and builds the shared + per-market handles
    pub fn open(path: &Path, markets: &[String]) -> StoreResult<Self> {
        let root = SqliteStore::open(path)?;
        let shared: Arc<dyn KvStore> = Arc::new(root.namespace("shared"));

        let mut market_stores: HashMap<String, Arc<dyn KvStore>> = HashMap::new();
        for market in markets {
            let store = root.namespace(&format!("market:{market}"));
            market_stores.insert(market.clone(), Arc::new(store));
        }

        Ok(Self {
            shared,
            markets: market_stores,
        })
    }

    /// Builds stores from pre-constructed handles (used by tests)
    pub fn from_parts(
        shared: Arc<dyn KvStore>,
        markets: HashMap<String, Arc<dyn KvStore>>,
    ) -> Self {
        Self { shared, markets }
    }

    /// The store holding one market's shipping snapshots
    pub fn market(&self, market: &str) -> Option<Arc<dyn KvStore>> {
        self.markets.get(market).cloned()
    }

    /// All configured market names
    pub fn market_names(&self) -> Vec<String> {
        self.markets.keys().cloned().collect()
    }
}
