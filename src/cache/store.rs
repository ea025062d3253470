//! Named-store handles over a storage backend.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{RequestKey, StoredResponse};
use crate::network::Response;

/// Entry point to every named store in a backend.
#[derive(Clone)]
pub struct Caches {
  backend: Arc<dyn CacheStorage>,
}

impl Caches {
  pub fn new(backend: Arc<dyn CacheStorage>) -> Self {
    Self { backend }
  }

  /// Open the named store, creating it if absent.
  pub async fn open(&self, name: &str) -> Result<Store> {
    self.backend.open_store(name).await?;
    Ok(self.store(name))
  }

  /// Handle on a store without touching the backend. Writes are dropped until it is opened.
  pub fn store(&self, name: &str) -> Store {
    Store {
      name: name.to_string(),
      backend: Arc::clone(&self.backend),
    }
  }

  pub async fn has(&self, name: &str) -> Result<bool> {
    self.backend.has_store(name).await
  }

  pub async fn names(&self) -> Result<Vec<String>> {
    self.backend.store_names().await
  }

  pub async fn delete(&self, name: &str) -> Result<bool> {
    self.backend.delete_store(name).await
  }
}

/// One named store, e.g. the store of the current generation.
#[derive(Clone)]
pub struct Store {
  name: String,
  backend: Arc<dyn CacheStorage>,
}

impl Store {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Exact-match lookup by request identity.
  pub async fn match_request(&self, key: &RequestKey) -> Result<Option<Response>> {
    let stored = self.backend.get(&self.name, key).await?;
    Ok(stored.map(StoredResponse::into_response))
  }

  /// Write a snapshot of `response`, replacing any previous entry.
  ///
  /// Returns `false` without writing if the store has not been opened.
  pub async fn put(&self, key: &RequestKey, response: &Response) -> Result<bool> {
    let stored = StoredResponse::from_response(response);
    self.backend.put(&self.name, key, &stored).await
  }

  pub async fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.backend.remove(&self.name, key).await
  }

  pub async fn keys(&self) -> Result<Vec<RequestKey>> {
    self.backend.keys(&self.name).await
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}
