//! Cache storage trait with SQLite and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use super::traits::{RequestKey, StoredResponse};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping request identities
/// to stored responses. Only `open_store` creates a store: a write into a store
/// that does not exist is dropped.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  async fn open_store(&self, name: &str) -> Result<()>;

  async fn has_store(&self, name: &str) -> Result<bool>;

  /// Names of every store, sorted.
  async fn store_names(&self) -> Result<Vec<String>>;

  /// Drop a store and all of its entries. Returns whether it existed.
  async fn delete_store(&self, name: &str) -> Result<bool>;

  async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Insert or overwrite one entry. Returns `false` if the store does not exist.
  async fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<bool>;

  /// Remove one entry. Returns whether it existed.
  async fn remove(&self, store: &str, key: &RequestKey) -> Result<bool>;

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>>;
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  stores: RwLock<BTreeMap<String, HashMap<RequestKey, StoredResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open_store(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(name.to_string()).or_default();
    Ok(())
  }

  async fn has_store(&self, name: &str) -> Result<bool> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.contains_key(name))
  }

  async fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.keys().cloned().collect())
  }

  async fn delete_store(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(name).is_some())
  }

  async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(store).and_then(|entries| entries.get(key)).cloned())
  }

  async fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<bool> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    match stores.get_mut(store) {
      Some(entries) => {
        entries.insert(key.clone(), response.clone());
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn remove(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get_mut(store)
        .map(|entries| entries.remove(key).is_some())
        .unwrap_or(false),
    )
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut keys: Vec<RequestKey> = stores
      .get(store)
      .map(|entries| entries.keys().cloned().collect())
      .unwrap_or_default();
    keys.sort();
    Ok(keys)
  }
}

/// SQLite-based cache storage implementation.
///
/// rusqlite is blocking, so every call runs on the blocking thread pool.
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shelter").join("cache.db"))
  }

  /// Run `op` against the connection on the blocking pool.
  async fn with_conn<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      op(&mut *conn)
    })
    .await
    .map_err(|e| eyre!("Cache task failed: {}", e))?
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named store (generation)
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by a hash of the request identity
CREATE TABLE IF NOT EXISTS entries (
    store TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_store ON entries(store);
"#;

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open_store(&self, name: &str) -> Result<()> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn
          .execute(
            "INSERT OR IGNORE INTO stores (name) VALUES (?)",
            params![name],
          )
          .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;
        Ok(())
      })
      .await
  }

  async fn has_store(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        let found: Option<i64> = conn
          .query_row(
            "SELECT 1 FROM stores WHERE name = ?",
            params![name],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| eyre!("Failed to look up store {}: {}", name, e))?;
        Ok(found.is_some())
      })
      .await
  }

  async fn store_names(&self) -> Result<Vec<String>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn
          .prepare("SELECT name FROM stores ORDER BY name")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let names = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list stores: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read store name: {}", e))?;

        Ok(names)
      })
      .await
  }

  async fn delete_store(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        tx.execute("DELETE FROM entries WHERE store = ?", params![name])
          .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
        let removed = tx
          .execute("DELETE FROM stores WHERE name = ?", params![name])
          .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(removed > 0)
      })
      .await
  }

  async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let store = store.to_string();
    let key_hash = key.cache_hash();
    self
      .with_conn(move |conn| {
        let row: Option<(u16, String, Vec<u8>, String)> = conn
          .query_row(
            "SELECT status, headers, body, cached_at FROM entries
             WHERE store = ? AND key_hash = ?",
            params![store, key_hash],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to query entry: {}", e))?;

        match row {
          Some((status, headers, body, cached_at)) => {
            let headers: Vec<(String, String)> = serde_json::from_str(&headers)
              .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
            Ok(Some(StoredResponse {
              status,
              headers,
              body: body.into(),
              cached_at: parse_datetime(&cached_at)?,
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  async fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<bool> {
    let store = store.to_string();
    let key = key.clone();
    let response = response.clone();
    self
      .with_conn(move |conn| {
        let headers = serde_json::to_string(&response.headers)
          .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        let exists: Option<i64> = tx
          .query_row(
            "SELECT 1 FROM stores WHERE name = ?",
            params![store],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| eyre!("Failed to look up store {}: {}", store, e))?;
        if exists.is_none() {
          return Ok(false);
        }

        tx.execute(
          "INSERT OR REPLACE INTO entries (store, key_hash, method, url, status, headers, body, cached_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
          params![
            store,
            key.cache_hash(),
            key.method,
            key.url,
            response.status,
            headers,
            &response.body[..],
            format_datetime(&response.cached_at),
          ],
        )
        .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(true)
      })
      .await
  }

  async fn remove(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let store = store.to_string();
    let key_hash = key.cache_hash();
    self
      .with_conn(move |conn| {
        let removed = conn
          .execute(
            "DELETE FROM entries WHERE store = ? AND key_hash = ?",
            params![store, key_hash],
          )
          .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
        Ok(removed > 0)
      })
      .await
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let store = store.to_string();
    self
      .with_conn(move |conn| {
        let mut stmt = conn
          .prepare("SELECT method, url FROM entries WHERE store = ? ORDER BY method, url")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let keys = stmt
          .query_map(params![store], |row| {
            Ok(RequestKey {
              method: row.get(0)?,
              url: row.get(1)?,
            })
          })
          .map_err(|e| eyre!("Failed to query keys: {}", e))?
          .collect::<rusqlite::Result<Vec<RequestKey>>>()
          .map_err(|e| eyre!("Failed to read key: {}", e))?;

        Ok(keys)
      })
      .await
  }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
