//! Request and response types, and the network seam the agent fetches through.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::time::Duration;
use url::{Origin, Url};

use crate::cache::RequestKey;

/// How the hosted application issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  /// Cross-origin request whose response the application may not inspect
  NoCors,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      mode,
    }
  }

  /// Plain subresource `GET`.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::SameOrigin)
  }

  /// Document navigation `GET`.
  pub fn navigate(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::Navigate)
  }

  /// Cache identity of this request (method + absolute URL).
  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method.as_str(), &self.url)
  }
}

/// Whether the application may read the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
  #[default]
  Basic,
  /// Cross-origin `no-cors` response; status and body are not trustworthy
  Opaque,
}

/// A response delivered to the application.
///
/// Cloning shares the body buffer, so every consumer (the caller, a cache
/// write) gets its own handle on the same payload without re-reading it.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub kind: ResponseKind,
}

/// Status of the terminal response served when nothing else is available.
pub const UNAVAILABLE_STATUS: u16 = 503;

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn opaque(mut self) -> Self {
    self.kind = ResponseKind::Opaque;
    self
  }

  /// Terminal response for a navigation that neither network nor cache could serve.
  pub fn unavailable() -> Self {
    Self::new(UNAVAILABLE_STATUS, "Service Unavailable")
      .with_header("content-type", "text/plain; charset=utf-8")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only readable, successful responses may be written to a store.
  pub fn is_cacheable(&self) -> bool {
    self.kind == ResponseKind::Basic && self.is_success()
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Anything that can perform a fetch on the agent's behalf.
///
/// An `Err` is a transient network failure (refused, reset, timed out). An
/// HTTP error status is still an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network implementation backed by `reqwest`.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  /// Create a client for an agent serving `origin`; every fetch is bounded by `timeout`.
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    let kind = if request.mode == RequestMode::NoCors && request.url.origin() != self.origin {
      ResponseKind::Opaque
    } else {
      ResponseKind::Basic
    };

    Ok(Response {
      status,
      headers,
      body,
      kind,
    })
  }
}
