//! Requests and responses passing through the asset interceptor.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::error::{FetchError, FetchResult};

/// Response type, following the fetch standard's classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response
  Cors,
  /// Opaque response (no readable status or body)
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "basic" => Self::Basic,
      "cors" => Self::Cors,
      _ => Self::Opaque,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
  pub method: String,
  pub url: Url,
}

impl AssetRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
    }
  }

  /// Request for `path` relative to `origin`.
  pub fn for_path(origin: &Url, path: &str) -> Result<Self> {
    let url = origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))?;
    Ok(Self::get(url))
  }

  /// URL with the query string removed.
  pub fn url_without_search(&self) -> String {
    let mut url = self.url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
  }

  /// Lowercase file extension of the last path segment.
  pub fn extension(&self) -> Option<String> {
    let segment = self.url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    Some(ext.to_lowercase())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
  pub status: u16,
  pub status_text: String,
  pub kind: ResponseKind,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl AssetResponse {
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }
}

/// Network side of the interceptor.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
  async fn fetch(&self, request: &AssetRequest) -> FetchResult<AssetResponse>;
}

/// Fetches assets over HTTP, classifying responses by origin.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
  http: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { http, origin })
  }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
  async fn fetch(&self, request: &AssetRequest) -> FetchResult<AssetResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::Malformed(format!("bad method {}: {}", request.method, e)))?;

    let response = self
      .http
      .request(method, request.url.clone())
      .send()
      .await?;

    let kind = if response.url().origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let status = response.status();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.bytes().await?.to_vec();

    Ok(AssetResponse {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      kind,
      content_type,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_without_search() {
    let origin = Url::parse("http://localhost:8000").unwrap();
    let req = AssetRequest::for_path(&origin, "/restaurant.html?id=3").unwrap();
    assert_eq!(req.url_without_search(), "http://localhost:8000/restaurant.html");
  }

  #[test]
  fn test_extension() {
    let origin = Url::parse("http://localhost:8000").unwrap();
    let webp = AssetRequest::for_path(&origin, "/images/1_1x.WEBP?v=2").unwrap();
    assert_eq!(webp.extension().as_deref(), Some("webp"));

    let dir = AssetRequest::for_path(&origin, "/images/").unwrap();
    assert_eq!(dir.extension(), None);
  }
}
