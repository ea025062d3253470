//! Generation lifecycle: populate the current generation's store, retire the rest.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{Caches, Store};
use crate::network::{Network, Request};

/// Opaque version token supplied by whoever deploys the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for GenerationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A generation and the store it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  prefix: String,
  id: GenerationId,
}

impl Generation {
  pub fn new(prefix: impl Into<String>, id: GenerationId) -> Self {
    Self {
      prefix: prefix.into(),
      id,
    }
  }

  pub fn id(&self) -> &GenerationId {
    &self.id
  }

  /// `prefix + id`
  pub fn store_name(&self) -> String {
    format!("{}{}", self.prefix, self.id)
  }
}

/// Ordered entries that must be cached before the agent can serve offline.
///
/// Relative entries resolve against the agent origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
  entries: Vec<String>,
}

impl AssetManifest {
  pub fn new(entries: Vec<String>) -> Self {
    Self { entries }
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }
}

/// Manifest entry that did not make it into the store.
#[derive(Debug, Clone)]
pub struct SkippedAsset {
  pub entry: String,
  pub reason: String,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
  pub store: String,
  /// Cached assets, in manifest order
  pub cached: Vec<Url>,
  /// Assets that failed, in manifest order
  pub skipped: Vec<SkippedAsset>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  pub kept: String,
  pub deleted: Vec<String>,
  /// Stores whose deletion failed; they stay behind until a later activation
  pub failed: Vec<String>,
}

/// Owns the current generation and its install/activate procedures.
pub struct GenerationManager {
  caches: Caches,
  network: Arc<dyn Network>,
  generation: Generation,
  manifest: AssetManifest,
  origin: Url,
}

impl GenerationManager {
  pub fn new(
    caches: Caches,
    network: Arc<dyn Network>,
    generation: Generation,
    manifest: AssetManifest,
    origin: Url,
  ) -> Self {
    Self {
      caches,
      network,
      generation,
      manifest,
      origin,
    }
  }

  pub fn generation(&self) -> &Generation {
    &self.generation
  }

  pub fn caches(&self) -> &Caches {
    &self.caches
  }

  /// Handle on the current generation's store.
  pub fn current_store(&self) -> Store {
    self.caches.store(&self.generation.store_name())
  }

  /// Whether the current generation's store exists already.
  pub async fn is_installed(&self) -> Result<bool> {
    self.caches.has(&self.generation.store_name()).await
  }

  /// Populate the current store from the manifest.
  ///
  /// Only failing to open the store is fatal; each asset is fetched fresh and
  /// a failing asset is logged and skipped.
  pub async fn install(&self) -> Result<InstallReport> {
    let name = self.generation.store_name();
    info!(generation = %self.generation.id(), store = %name, assets = self.manifest.entries().len(), "installing generation");

    let store = self
      .caches
      .open(&name)
      .await
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;

    let outcomes = join_all(
      self
        .manifest
        .entries()
        .iter()
        .map(|entry| self.install_asset(&store, entry)),
    )
    .await;

    let mut report = InstallReport {
      store: name,
      cached: Vec::new(),
      skipped: Vec::new(),
    };

    for (entry, outcome) in self.manifest.entries().iter().zip(outcomes) {
      match outcome {
        Ok(url) => report.cached.push(url),
        Err(e) => {
          warn!(%entry, error = %e, "skipping manifest asset");
          report.skipped.push(SkippedAsset {
            entry: entry.clone(),
            reason: e.to_string(),
          });
        }
      }
    }

    info!(
      store = %report.store,
      cached = report.cached.len(),
      skipped = report.skipped.len(),
      "install complete"
    );

    Ok(report)
  }

  async fn install_asset(&self, store: &Store, entry: &str) -> Result<Url> {
    let url = self
      .origin
      .join(entry)
      .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;

    let request = Request::get(url.clone());
    let response = self.network.fetch(&request).await?;
    if !response.is_cacheable() {
      return Err(eyre!("Unexpected status {} for {}", response.status, url));
    }

    if !store.put(&request.key(), &response).await? {
      return Err(eyre!("Store {} was deleted during install", store.name()));
    }
    Ok(url)
  }

  /// Delete every store except the current generation's.
  ///
  /// Deletions run concurrently and failures are only logged. If the store
  /// names cannot be listed nothing is deleted.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let current = self.generation.store_name();
    let names = self
      .caches
      .names()
      .await
      .map_err(|e| eyre!("Failed to list stores: {}", e))?;

    let stale: Vec<String> = names.into_iter().filter(|name| *name != current).collect();
    info!(store = %current, stale = stale.len(), "activating generation");

    let results = join_all(stale.iter().map(|name| self.caches.delete(name))).await;

    let mut report = ActivationReport {
      kept: current,
      ..Default::default()
    };
    for (name, result) in stale.into_iter().zip(results) {
      match result {
        Ok(_) => {
          info!(store = %name, "deleted stale store");
          report.deleted.push(name);
        }
        Err(e) => {
          warn!(store = %name, error = %e, "failed to delete stale store");
          report.failed.push(name);
        }
      }
    }

    Ok(report)
  }
}
