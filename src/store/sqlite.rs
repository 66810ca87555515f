//! SQLite implementation of the key-value store
//!
//! One database file holds every namespace in a single `kv` table keyed by
//! `(namespace, key)`. Namespace handles share the connection.

use crate::store::traits::{KvStore, StoreResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed blob store scoped to one namespace
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`, scoped to the "shared"
    /// namespace
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: "shared".to_string(),
        })
    }

    /// Creates an in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: "shared".to_string(),
        })
    }

    /// Returns a handle scoped to another namespace on the same database
    pub fn namespace(&self, namespace: &str) -> SqliteStore {
        SqliteStore {
            conn: Arc::clone(&self.conn),
            namespace: namespace.to_string(),
        }
    }
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (namespace, key)
        );
    ",
    )
}

impl KvStore for SqliteStore {
    fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (namespace, key) DO UPDATE SET value = ?3, updated_at = ?4",
            params![self.namespace, key, value, now],
        )?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE namespace = ?1 AND key LIKE ?2 ESCAPE '\\' ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![self.namespace, pattern], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::KvStoreExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        name: String,
        count: u32,
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let blob = Blob {
            name: "a".to_string(),
            count: 3,
        };

        store.put_json("items/core/a.json", &blob).unwrap();
        let back: Option<Blob> = store.get_json("items/core/a.json").unwrap();
        assert_eq!(back, Some(blob));
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        let value: Option<Blob> = store.get_json("nope.json").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_raw("k", "1").unwrap();
        store.put_raw("k", "2").unwrap();
        assert_eq!(store.get_raw("k").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_list_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_raw("items/core/a.json", "{}").unwrap();
        store.put_raw("items/core/b.json", "{}").unwrap();
        store.put_raw("sellers/s.json", "{}").unwrap();

        let keys = store.list("items/core/").unwrap();
        assert_eq!(keys, vec!["items/core/a.json", "items/core/b.json"]);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let shared = SqliteStore::open_in_memory().unwrap();
        let market = shared.namespace("market:us");

        shared.put_raw("shipping/a.json", "\"shared\"").unwrap();
        market.put_raw("shipping/a.json", "\"us\"").unwrap();

        assert_eq!(
            shared.get_raw("shipping/a.json").unwrap(),
            Some("\"shared\"".to_string())
        );
        assert_eq!(
            market.get_raw("shipping/a.json").unwrap(),
            Some("\"us\"".to_string())
        );
    }
}
