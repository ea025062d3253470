mod common;

use common::{url, BrokenStorage, ScriptedNetwork, StickyStorage};
use shelter::cache::{CacheStorage, Caches, MemoryStorage, RequestKey};
use shelter::generation::{AssetManifest, Generation, GenerationId, GenerationManager};
use std::sync::Arc;

fn manager(
  storage: Arc<dyn CacheStorage>,
  network: Arc<ScriptedNetwork>,
  prefix: &str,
  id: &str,
  entries: &[&str],
) -> GenerationManager {
  GenerationManager::new(
    Caches::new(storage),
    network,
    Generation::new(prefix, GenerationId::new(id)),
    AssetManifest::new(entries.iter().map(|e| e.to_string()).collect()),
    url(""),
  )
}

#[tokio::test]
async fn test_install_skips_failed_assets_and_keeps_going() {
  let network = ScriptedNetwork::new();
  network.respond(&url("a.js"), 200, "A");
  network.fail(&url("b.png"));
  network.respond(&url("c.css"), 200, "C");

  let storage = Arc::new(MemoryStorage::new());
  let manager = manager(
    storage.clone(),
    network,
    "app-",
    "v1",
    &["a.js", "b.png", "c.css"],
  );

  let report = manager.install().await.unwrap();
  assert_eq!(report.store, "app-v1");
  assert_eq!(report.cached, vec![url("a.js"), url("c.css")]);
  assert_eq!(report.skipped.len(), 1);
  assert_eq!(report.skipped[0].entry, "b.png");

  let store = manager.current_store();
  assert_eq!(
    store.keys().await.unwrap(),
    vec![RequestKey::get(&url("a.js")), RequestKey::get(&url("c.css"))]
  );
  assert!(store
    .match_request(&RequestKey::get(&url("b.png")))
    .await
    .unwrap()
    .is_none());

  // Activation still goes ahead
  let activation = manager.activate().await.unwrap();
  assert_eq!(activation.kept, "app-v1");
  assert!(activation.failed.is_empty());
}

#[tokio::test]
async fn test_install_skips_error_statuses() {
  let network = ScriptedNetwork::new();
  network.respond(&url("index.html"), 200, "index");
  network.respond(&url("icon-512.png"), 404, "missing");

  let manager = manager(
    Arc::new(MemoryStorage::new()),
    network,
    "app-",
    "v1",
    &["./index.html", "./icon-512.png"],
  );

  let report = manager.install().await.unwrap();
  assert_eq!(report.cached, vec![url("index.html")]);
  assert_eq!(report.skipped[0].entry, "./icon-512.png");
  assert!(report.skipped[0].reason.contains("404"));
}

#[tokio::test]
async fn test_install_is_idempotent() {
  let network = ScriptedNetwork::new();
  network.respond(&url(""), 200, "root");
  network.respond(&url("index.html"), 200, "index");
  network.respond(&url("manifest.json"), 200, "{}");

  let manager = manager(
    Arc::new(MemoryStorage::new()),
    network,
    "app-",
    "v1",
    &["./", "./index.html", "./manifest.json"],
  );

  async fn snapshot(manager: &GenerationManager) -> Vec<(RequestKey, String)> {
    let store = manager.current_store();
    let mut entries = Vec::new();
    for key in store.keys().await.unwrap() {
      let body = store.match_request(&key).await.unwrap().unwrap().text();
      entries.push((key, body));
    }
    entries
  }

  manager.install().await.unwrap();
  let first = snapshot(&manager).await;
  manager.install().await.unwrap();
  let second = snapshot(&manager).await;

  assert_eq!(first.len(), 3);
  assert_eq!(first, second);
}

#[tokio::test]
async fn test_install_fails_only_when_store_cannot_open() {
  let network = ScriptedNetwork::new();
  network.respond(&url("index.html"), 200, "index");

  let manager = manager(Arc::new(BrokenStorage), network, "app-", "v1", &["index.html"]);
  assert!(manager.install().await.is_err());
}

#[tokio::test]
async fn test_activation_deletes_every_other_store() {
  let storage = Arc::new(MemoryStorage::new());
  storage.open_store("v1").await.unwrap();
  storage.open_store("v2").await.unwrap();

  let manager = manager(storage.clone(), ScriptedNetwork::new(), "", "v2", &[]);
  let report = manager.activate().await.unwrap();

  assert_eq!(report.kept, "v2");
  assert_eq!(report.deleted, vec!["v1"]);
  assert_eq!(storage.store_names().await.unwrap(), vec!["v2"]);
}

#[tokio::test]
async fn test_activation_leaves_current_store_untouched() {
  let storage = Arc::new(MemoryStorage::new());
  let caches = Caches::new(storage.clone());
  let current = caches.open("app-v2").await.unwrap();
  current
    .put(
      &RequestKey::get(&url("index.html")),
      &shelter::network::Response::new(200, "v2 index"),
    )
    .await
    .unwrap();
  caches.open("app-v1").await.unwrap();
  caches.open("other-app").await.unwrap();

  let manager = manager(storage.clone(), ScriptedNetwork::new(), "app-", "v2", &[]);
  let report = manager.activate().await.unwrap();

  assert_eq!(report.deleted, vec!["app-v1", "other-app"]);
  let hit = current
    .match_request(&RequestKey::get(&url("index.html")))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(hit.text(), "v2 index");
}

#[tokio::test]
async fn test_failed_deletion_is_reported_not_escalated() {
  let storage = Arc::new(StickyStorage {
    inner: MemoryStorage::new(),
    sticky: "app-v0".to_string(),
  });
  for name in ["app-v0", "app-v1", "app-v2"] {
    storage.open_store(name).await.unwrap();
  }

  let manager = manager(storage.clone(), ScriptedNetwork::new(), "app-", "v2", &[]);
  let report = manager.activate().await.unwrap();

  assert_eq!(report.deleted, vec!["app-v1"]);
  assert_eq!(report.failed, vec!["app-v0"]);
  assert_eq!(
    storage.store_names().await.unwrap(),
    vec!["app-v0", "app-v2"]
  );
}

#[tokio::test]
async fn test_activation_fails_when_stores_cannot_be_listed() {
  let manager = manager(Arc::new(BrokenStorage), ScriptedNetwork::new(), "app-", "v2", &[]);
  assert!(manager.activate().await.is_err());
}
