//! Maps an intercepted request to the resource class that picks its policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Origin, Url};

use crate::network::{Request, RequestMode};

/// Closed set of resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
  /// Data the application cannot work without (e.g. the CSV it renders)
  CriticalData,
  /// Documents, whether navigated to or fetched by name
  Navigation,
  /// Same-origin subresources: scripts, styles, icons, manifests
  StaticAsset,
  /// Another origin's resource; never intercepted
  External,
}

impl ResourceClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::CriticalData => "critical_data",
      Self::Navigation => "navigation",
      Self::StaticAsset => "static_asset",
      Self::External => "external",
    }
  }
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Total, side-effect-free request classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Origin,
  critical_suffix: String,
  document_suffix: String,
}

impl Classifier {
  pub fn new(origin: &Url, critical_suffix: &str, document_suffix: &str) -> Self {
    Self {
      origin: origin.origin(),
      critical_suffix: critical_suffix.to_ascii_lowercase(),
      document_suffix: document_suffix.to_ascii_lowercase(),
    }
  }

  /// Rules apply in order: critical-data suffix, navigation, foreign origin, static asset.
  pub fn classify(&self, request: &Request) -> ResourceClass {
    let path = request.url.path();

    if ends_with_ignore_case(path, &self.critical_suffix) {
      ResourceClass::CriticalData
    } else if request.mode == RequestMode::Navigate
      || ends_with_ignore_case(path, &self.document_suffix)
    {
      ResourceClass::Navigation
    } else if request.url.origin() != self.origin {
      ResourceClass::External
    } else {
      ResourceClass::StaticAsset
    }
  }
}

/// An empty suffix matches nothing.
fn ends_with_ignore_case(path: &str, suffix: &str) -> bool {
  if suffix.is_empty() || path.len() < suffix.len() {
    return false;
  }
  path.as_bytes()[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(&Url::parse("https://app.example/").unwrap(), ".csv", ".html")
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_critical_data_by_suffix() {
    let c = classifier();
    assert_eq!(
      c.classify(&get("https://app.example/data/maestro.csv")),
      ResourceClass::CriticalData
    );
    assert_eq!(
      c.classify(&get("https://app.example/data/MAESTRO.CSV?t=1")),
      ResourceClass::CriticalData
    );
  }

  #[test]
  fn test_navigation_by_mode_or_suffix() {
    let c = classifier();
    let nav = Request::navigate(Url::parse("https://app.example/").unwrap());
    assert_eq!(c.classify(&nav), ResourceClass::Navigation);
    assert_eq!(
      c.classify(&get("https://app.example/index.html")),
      ResourceClass::Navigation
    );
  }

  #[test]
  fn test_foreign_origin_is_external() {
    let c = classifier();
    assert_eq!(
      c.classify(&get("https://cdn.example/lib.js")),
      ResourceClass::External
    );
    assert_eq!(
      c.classify(&get("http://app.example/style.css")),
      ResourceClass::External
    );
  }

  #[test]
  fn test_suffix_rules_win_over_origin() {
    let c = classifier();
    assert_eq!(
      c.classify(&get("https://sheets.example/export.csv")),
      ResourceClass::CriticalData
    );
  }

  #[test]
  fn test_everything_else_is_static() {
    let c = classifier();
    for url in [
      "https://app.example/style.css",
      "https://app.example/icon-192.png",
      "https://app.example/manifest.json",
      "https://app.example/",
    ] {
      assert_eq!(c.classify(&get(url)), ResourceClass::StaticAsset, "{}", url);
    }
  }

  #[test]
  fn test_empty_suffix_never_matches() {
    let c = Classifier::new(&Url::parse("https://app.example/").unwrap(), "", "");
    assert_eq!(
      c.classify(&get("https://app.example/data.csv")),
      ResourceClass::StaticAsset
    );
  }
}
