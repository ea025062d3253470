use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::activation::HandoffMode;
use crate::generation::{AssetManifest, Generation, GenerationId};
use crate::policy::StrategyTable;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the agent serves; requests to other origins are not intercepted
  pub origin: Url,
  /// Version token of this deployment
  pub generation: GenerationId,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Assets cached at install, relative to `origin`
  #[serde(default)]
  pub manifest: Vec<String>,
  /// Document served to navigations when offline and uncached
  pub offline_document: Option<String>,
  #[serde(default = "default_critical_suffix")]
  pub critical_suffix: String,
  #[serde(default = "default_document_suffix")]
  pub document_suffix: String,
  #[serde(default)]
  pub handoff: HandoffMode,
  #[serde(default = "default_network_timeout_secs")]
  pub network_timeout_secs: u64,
  #[serde(default)]
  pub strategies: StrategyTable,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to $XDG_DATA_HOME/shelter/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive, e.g. "info" or "shelter=debug"
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log to this file (rotated daily) instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_cache_prefix() -> String {
  "shelter-".to_string()
}

fn default_critical_suffix() -> String {
  ".csv".to_string()
}

fn default_document_suffix() -> String {
  ".html".to_string()
}

fn default_network_timeout_secs() -> u64 {
  10
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Configuration with defaults for everything but origin and generation.
  pub fn new(origin: Url, generation: GenerationId) -> Self {
    Self {
      origin,
      generation,
      cache_prefix: default_cache_prefix(),
      manifest: Vec::new(),
      offline_document: None,
      critical_suffix: default_critical_suffix(),
      document_suffix: default_document_suffix(),
      handoff: HandoffMode::default(),
      network_timeout_secs: default_network_timeout_secs(),
      strategies: StrategyTable::default(),
      storage: StorageConfig::default(),
      log: LogConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shelter.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shelter/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shelter/config.yaml\n\
                 See shelter.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shelter.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shelter").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  /// Parse, apply environment overrides and validate.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let mut config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;

    config.apply_env_overrides();
    config.validate()?;

    Ok(config)
  }

  /// SHELTER_GENERATION replaces the configured generation id.
  fn apply_env_overrides(&mut self) {
    if let Ok(generation) = std::env::var("SHELTER_GENERATION") {
      if !generation.trim().is_empty() {
        self.generation = GenerationId::new(generation.trim());
      }
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.generation.as_str().trim().is_empty() {
      return Err(eyre!("generation must not be empty"));
    }
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be an http(s) URL, got {}", self.origin));
    }
    if self.network_timeout_secs == 0 {
      return Err(eyre!("network_timeout_secs must be positive"));
    }
    if let Some(document) = self.offline_document_url()? {
      if !self.manifest_contains(&document) {
        tracing::warn!(%document, "offline document is not in the manifest; it may never be cached");
      }
    }
    Ok(())
  }

  /// Whether a manifest entry resolves to `url`. Unresolvable entries never match.
  pub fn manifest_contains(&self, url: &Url) -> bool {
    self
      .manifest
      .iter()
      .any(|entry| self.resolve(entry).map_or(false, |resolved| resolved == *url))
  }

  pub fn generation(&self) -> Generation {
    Generation::new(self.cache_prefix.clone(), self.generation.clone())
  }

  pub fn manifest(&self) -> AssetManifest {
    AssetManifest::new(self.manifest.clone())
  }

  pub fn offline_document_url(&self) -> Result<Option<Url>> {
    self
      .offline_document
      .as_deref()
      .map(|document| {
        self
          .origin
          .join(document)
          .map_err(|e| eyre!("Invalid offline document '{}': {}", document, e))
      })
      .transpose()
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  /// Resolve a possibly relative URL against the origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }
}
