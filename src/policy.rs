//! Policy engine: serves each intercepted request through the strategy of its class.
//!
//! | class          | default strategy          | when everything fails           |
//! |----------------|---------------------------|---------------------------------|
//! | critical data  | stale-while-revalidate    | error (no data at all)          |
//! | navigation     | network-first             | offline document, then 503      |
//! | static asset   | network-first             | error                           |
//! | external       | pass-through              | network error, unchanged        |
//!
//! Cache writes never delay the response: they run as spawned tasks whose
//! handle travels with the [`Served`] value so callers can observe them.

use color_eyre::{eyre::Report, Result};
use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{RequestKey, Store};
use crate::classify::{Classifier, ResourceClass};
use crate::network::{Network, Request, Response};

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
  NetworkFirst,
  CacheFirst,
  StaleWhileRevalidate,
}

/// Strategy per intercepted resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StrategyTable {
  pub critical_data: Strategy,
  pub navigation: Strategy,
  pub static_asset: Strategy,
}

impl Default for StrategyTable {
  fn default() -> Self {
    Self {
      critical_data: Strategy::StaleWhileRevalidate,
      navigation: Strategy::NetworkFirst,
      static_asset: Strategy::NetworkFirst,
    }
  }
}

impl StrategyTable {
  /// `None` means the class is not intercepted.
  pub fn for_class(&self, class: ResourceClass) -> Option<Strategy> {
    match class {
      ResourceClass::CriticalData => Some(self.critical_data),
      ResourceClass::Navigation => Some(self.navigation),
      ResourceClass::StaticAsset => Some(self.static_asset),
      ResourceClass::External => None,
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  /// Exact match in the current store
  Cache,
  /// The designated offline placeholder document
  OfflineDocument,
  /// Nothing was available; a synthetic 503
  Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundKind {
  /// Storing a response that was just fetched
  WriteThrough,
  /// Refreshing an entry that was served from cache
  Revalidation,
}

/// Handle on a detached cache write.
///
/// Dropping it does not cancel the work.
#[derive(Debug)]
pub struct Background {
  kind: BackgroundKind,
  handle: JoinHandle<bool>,
}

impl Background {
  pub fn kind(&self) -> BackgroundKind {
    self.kind
  }

  /// Wait for the task; `true` if it wrote to the store.
  pub async fn settled(self) -> bool {
    self.handle.await.unwrap_or(false)
  }
}

/// A response handed back to the application.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  pub class: ResourceClass,
  pub background: Option<Background>,
}

impl Served {
  fn new(response: Response, source: ResponseSource, background: Option<Background>) -> Self {
    Self {
      response,
      source,
      class: ResourceClass::External,
      background,
    }
  }

  fn with_class(mut self, class: ResourceClass) -> Self {
    self.class = class;
    self
  }

  /// Wait for any background write attached to this response.
  pub async fn settle(&mut self) -> bool {
    match self.background.take() {
      Some(background) => background.settled().await,
      None => false,
    }
  }
}

/// Answer given synchronously at dispatch time.
pub enum Interception {
  /// The agent will resolve this request.
  Respond(BoxFuture<'static, Result<Served>>),
  /// The agent declines; the request goes to the network untouched.
  Passthrough(Request),
}

impl std::fmt::Debug for Interception {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Respond(_) => f.write_str("Respond(..)"),
      Self::Passthrough(request) => f.debug_tuple("Passthrough").field(&request.url).finish(),
    }
  }
}

/// Serves requests against one generation's store.
#[derive(Clone)]
pub struct FetchMediator {
  store: Store,
  network: Arc<dyn Network>,
  classifier: Arc<Classifier>,
  strategies: StrategyTable,
  offline_document: Option<RequestKey>,
}

impl FetchMediator {
  pub fn new(store: Store, network: Arc<dyn Network>, classifier: Classifier) -> Self {
    Self {
      store,
      network,
      classifier: Arc::new(classifier),
      strategies: StrategyTable::default(),
      offline_document: None,
    }
  }

  pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
    self.strategies = strategies;
    self
  }

  /// Placeholder served to navigations when nothing better is available.
  pub fn with_offline_document(mut self, url: &url::Url) -> Self {
    self.offline_document = Some(RequestKey::get(url));
    self
  }

  /// Decide synchronously whether to take the request, resolving it later.
  pub fn intercept(&self, request: Request) -> Interception {
    let class = self.classifier.classify(&request);
    let Some(strategy) = self.strategies.for_class(class) else {
      debug!(url = %request.url, "passing through external request");
      return Interception::Passthrough(request);
    };

    let mediator = self.clone();
    Interception::Respond(Box::pin(async move {
      mediator.serve(request, class, strategy).await
    }))
  }

  /// Resolve a request end to end, including pass-through.
  pub async fn handle(&self, request: Request) -> Result<Served> {
    match self.intercept(request) {
      Interception::Respond(future) => future.await,
      Interception::Passthrough(request) => {
        // Faults on foreign resources are not ours to mask
        let response = self.network.fetch(&request).await?;
        Ok(Served::new(response, ResponseSource::Network, None))
      }
    }
  }

  async fn serve(&self, request: Request, class: ResourceClass, strategy: Strategy) -> Result<Served> {
    debug!(url = %request.url, %class, ?strategy, "intercepted request");

    let outcome = match strategy {
      Strategy::NetworkFirst => self.network_first(&request).await,
      Strategy::CacheFirst => self.cache_first(&request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request).await,
    };

    match outcome {
      Ok(served) => Ok(served.with_class(class)),
      Err(error) if class == ResourceClass::Navigation => {
        Ok(self.navigation_fallback(&request, error).await.with_class(class))
      }
      Err(error) => {
        warn!(url = %request.url, %class, error = %error, "no response available");
        Err(error)
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Result<Served> {
    match self.network.fetch(request).await {
      Ok(response) => {
        let background = self.write_through(request, &response);
        Ok(Served::new(response, ResponseSource::Network, background))
      }
      Err(error) => {
        info!(url = %request.url, error = %error, "network failed, falling back to cache");
        match self.lookup(&request.key()).await {
          Some(cached) => Ok(Served::new(cached, ResponseSource::Cache, None)),
          None => Err(error),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Served> {
    if let Some(cached) = self.lookup(&request.key()).await {
      return Ok(Served::new(cached, ResponseSource::Cache, None));
    }

    let response = self.network.fetch(request).await?;
    let background = self.write_through(request, &response);
    Ok(Served::new(response, ResponseSource::Network, background))
  }

  async fn stale_while_revalidate(&self, request: &Request) -> Result<Served> {
    if let Some(cached) = self.lookup(&request.key()).await {
      let background = self.revalidate(request.clone());
      return Ok(Served::new(cached, ResponseSource::Cache, Some(background)));
    }

    // Nothing cached: the network is the only source left
    let response = self.network.fetch(request).await?;
    let background = self.write_through(request, &response);
    Ok(Served::new(response, ResponseSource::Network, background))
  }

  async fn navigation_fallback(&self, request: &Request, error: Report) -> Served {
    if let Some(key) = &self.offline_document {
      if let Some(document) = self.lookup(key).await {
        info!(url = %request.url, offline_document = %key.url, "serving offline document");
        return Served::new(document, ResponseSource::OfflineDocument, None);
      }
    }

    warn!(url = %request.url, error = %error, "navigation unavailable");
    Served::new(Response::unavailable(), ResponseSource::Unavailable, None)
  }

  /// Cache read that degrades to a miss on I/O failure.
  async fn lookup(&self, key: &RequestKey) -> Option<Response> {
    match self.store.match_request(key).await {
      Ok(hit) => hit,
      Err(error) => {
        warn!(store = self.store.name(), %key, error = %error, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn write_through(&self, request: &Request, response: &Response) -> Option<Background> {
    if request.method != Method::GET || !response.is_cacheable() {
      debug!(url = %request.url, status = response.status, "response not cacheable");
      return None;
    }

    let store = self.store.clone();
    let key = request.key();
    let response = response.clone();
    let handle = tokio::spawn(async move { put_logged(&store, &key, &response).await });

    Some(Background {
      kind: BackgroundKind::WriteThrough,
      handle,
    })
  }

  /// Refresh an entry without holding up the caller. The task outlives the request.
  fn revalidate(&self, request: Request) -> Background {
    let store = self.store.clone();
    let network = Arc::clone(&self.network);

    let handle = tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if request.method == Method::GET && response.is_cacheable() => {
          let written = put_logged(&store, &request.key(), &response).await;
          if written {
            debug!(url = %request.url, "revalidated cache entry");
          }
          written
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation response not cacheable");
          false
        }
        Err(error) => {
          info!(url = %request.url, error = %error, "revalidation failed, keeping cached copy");
          false
        }
      }
    });

    Background {
      kind: BackgroundKind::Revalidation,
      handle,
    }
  }
}

async fn put_logged(store: &Store, key: &RequestKey, response: &Response) -> bool {
  match store.put(key, response).await {
    Ok(true) => true,
    Ok(false) => {
      debug!(store = store.name(), %key, "store not installed, skipping write");
      false
    }
    Err(error) => {
      warn!(store = store.name(), %key, error = %error, "cache write failed");
      false
    }
  }
}
