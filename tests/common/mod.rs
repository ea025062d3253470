#![allow(dead_code)]

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use shelter::activation::ClientSet;
use shelter::cache::{CacheStorage, MemoryStorage, RequestKey, StoredResponse};
use shelter::network::{Network, Request, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

pub const ORIGIN: &str = "https://app.example/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

enum Route {
  Respond(u16, &'static str),
  Fail,
  /// Respond only after the notify fires
  Held(Arc<Notify>, u16, &'static str),
}

/// Network double answering from a per-URL script. Unscripted URLs fail.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &Url, status: u16, body: &'static str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Respond(status, body));
  }

  pub fn fail(&self, url: &Url) {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
  }

  /// Script a response that is withheld until the returned notify fires.
  pub fn hold(&self, url: &Url, status: u16, body: &'static str) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Held(Arc::clone(&notify), status, body));
    notify
  }

  pub fn calls_to(&self, url: &Url) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| *c == url.as_str())
      .count()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.url.to_string());

    let route = {
      let routes = self.routes.lock().unwrap();
      match routes.get(request.url.as_str()) {
        Some(Route::Respond(status, body)) => Ok((None, *status, *body)),
        Some(Route::Held(notify, status, body)) => Ok((Some(Arc::clone(notify)), *status, *body)),
        Some(Route::Fail) | None => Err(eyre!("connection refused: {}", request.url)),
      }
    };

    let (held, status, body) = route?;
    if let Some(notify) = held {
      notify.notified().await;
    }
    Ok(Response::new(status, body))
  }
}

/// Memory storage that counts reads and writes.
#[derive(Default)]
pub struct CountingStorage {
  inner: MemoryStorage,
  pub reads: AtomicUsize,
  pub writes: AtomicUsize,
}

impl CountingStorage {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl CacheStorage for CountingStorage {
  async fn open_store(&self, name: &str) -> Result<()> {
    self.inner.open_store(name).await
  }

  async fn has_store(&self, name: &str) -> Result<bool> {
    self.inner.has_store(name).await
  }

  async fn store_names(&self) -> Result<Vec<String>> {
    self.inner.store_names().await
  }

  async fn delete_store(&self, name: &str) -> Result<bool> {
    self.inner.delete_store(name).await
  }

  async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.get(store, key).await
  }

  async fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<bool> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put(store, key, response).await
  }

  async fn remove(&self, store: &str, key: &RequestKey) -> Result<bool> {
    self.inner.remove(store, key).await
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    self.inner.keys(store).await
  }
}

/// Storage whose every operation fails, as a broken disk would.
pub struct BrokenStorage;

#[async_trait]
impl CacheStorage for BrokenStorage {
  async fn open_store(&self, _name: &str) -> Result<()> {
    Err(eyre!("disk unavailable"))
  }

  async fn has_store(&self, _name: &str) -> Result<bool> {
    Err(eyre!("disk unavailable"))
  }

  async fn store_names(&self) -> Result<Vec<String>> {
    Err(eyre!("disk unavailable"))
  }

  async fn delete_store(&self, _name: &str) -> Result<bool> {
    Err(eyre!("disk unavailable"))
  }

  async fn get(&self, _store: &str, _key: &RequestKey) -> Result<Option<StoredResponse>> {
    Err(eyre!("disk unavailable"))
  }

  async fn put(&self, _store: &str, _key: &RequestKey, _response: &StoredResponse) -> Result<bool> {
    Err(eyre!("disk unavailable"))
  }

  async fn remove(&self, _store: &str, _key: &RequestKey) -> Result<bool> {
    Err(eyre!("disk unavailable"))
  }

  async fn keys(&self, _store: &str) -> Result<Vec<RequestKey>> {
    Err(eyre!("disk unavailable"))
  }
}

/// Memory storage that refuses to delete one named store.
pub struct StickyStorage {
  pub inner: MemoryStorage,
  pub sticky: String,
}

#[async_trait]
impl CacheStorage for StickyStorage {
  async fn open_store(&self, name: &str) -> Result<()> {
    self.inner.open_store(name).await
  }

  async fn has_store(&self, name: &str) -> Result<bool> {
    self.inner.has_store(name).await
  }

  async fn store_names(&self) -> Result<Vec<String>> {
    self.inner.store_names().await
  }

  async fn delete_store(&self, name: &str) -> Result<bool> {
    if name == self.sticky {
      return Err(eyre!("store {} is locked", name));
    }
    self.inner.delete_store(name).await
  }

  async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    self.inner.get(store, key).await
  }

  async fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<bool> {
    self.inner.put(store, key, response).await
  }

  async fn remove(&self, store: &str, key: &RequestKey) -> Result<bool> {
    self.inner.remove(store, key).await
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    self.inner.keys(store).await
  }
}

/// Client set that records the commands it receives.
#[derive(Default)]
pub struct RecordingClients {
  pub skip_waiting: AtomicUsize,
  pub claims: AtomicUsize,
}

impl RecordingClients {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn skip_waiting_calls(&self) -> usize {
    self.skip_waiting.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ClientSet for RecordingClients {
  async fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
