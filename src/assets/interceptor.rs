//! Cache-first interception of static asset requests.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::AssetCache;
use super::fetch::{AssetFetcher, AssetRequest, AssetResponse, ResponseKind};
use super::lifecycle::GenerationState;
use crate::config::AssetsConfig;

pub const OFFLINE_NOTICE: &str =
  "Application is offline. Please check your connection or try again later.";

/// How an intercepted request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  Cache,
  Network,
  /// Placeholder image standing in for one that could not be fetched
  Fallback,
  /// Synthetic offline response
  OfflineNotice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
  /// Not handled here; the caller talks to the network directly
  Bypassed,
  Served {
    response: AssetResponse,
    from: ServedFrom,
  },
}

/// Result of populating a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  /// Manifest paths that could not be fetched
  pub failed: Vec<String>,
}

/// Serves static assets from the current cache generation, falling back to
/// the network and, when that fails, to a placeholder or an offline notice.
pub struct Interceptor<F: AssetFetcher> {
  cache: AssetCache,
  fetcher: F,
  origin: Url,
  generation: String,
  expected: Vec<String>,
  manifest: Vec<String>,
  fallback_image: String,
  image_extensions: Vec<String>,
  /// Port of the review server; its requests are never intercepted
  api_port: Option<u16>,
  state: GenerationState,
}

impl<F: AssetFetcher> Interceptor<F> {
  /// Create an interceptor for the configured generation, resuming whatever
  /// lifecycle state an earlier run left it in.
  pub fn new(
    cache: AssetCache,
    fetcher: F,
    config: &AssetsConfig,
    api_port: Option<u16>,
  ) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid asset origin {}: {}", config.origin, e))?;

    let state = match cache.generation(&config.generation)? {
      Some(record) if record.activated => GenerationState::Activated,
      Some(record) if record.installed => GenerationState::Installed,
      _ => GenerationState::Parsed,
    };

    Ok(Self {
      cache,
      fetcher,
      origin,
      generation: config.generation.clone(),
      expected: config.expected_generations(),
      manifest: config.manifest.clone(),
      fallback_image: config.fallback_image.clone(),
      image_extensions: config.image_extensions.clone(),
      api_port,
      state,
    })
  }

  pub fn state(&self) -> GenerationState {
    self.state
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn cache(&self) -> &AssetCache {
    &self.cache
  }

  /// Populate the current generation with the manifest.
  ///
  /// Entries are stored only if every one of them could be fetched; a partial
  /// manifest leaves the generation untouched. Either way the generation ends
  /// up installed.
  pub async fn install(&mut self) -> Result<InstallReport> {
    self.state.transition(GenerationState::Installing)?;
    self.cache.open_generation(&self.generation)?;

    let requests = self
      .manifest
      .iter()
      .map(|path| AssetRequest::for_path(&self.origin, path))
      .collect::<Result<Vec<_>>>()?;

    let responses = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut entries = Vec::with_capacity(requests.len());
    let mut failed = Vec::new();
    for ((path, request), response) in self.manifest.iter().zip(requests).zip(responses) {
      match response {
        Ok(response) if response.is_ok() => entries.push((request, response)),
        Ok(response) => {
          debug!(path, status = response.status, "manifest entry rejected");
          failed.push(path.clone());
        }
        Err(e) => {
          debug!(path, error = %e, "manifest entry unreachable");
          failed.push(path.clone());
        }
      }
    }

    let cached = if failed.is_empty() {
      self.cache.put_all(&self.generation, &entries)?;
      entries.len()
    } else {
      warn!(generation = %self.generation, failed = ?failed, "cache population failed");
      0
    };

    self.cache.mark_installed(&self.generation)?;
    self.state.transition(GenerationState::Installed)?;
    info!(generation = %self.generation, cached, "asset cache installed");

    Ok(InstallReport { cached, failed })
  }

  /// Delete every generation outside the expected set and start serving.
  /// Returns the names of the deleted generations.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    self.state.transition(GenerationState::Activating)?;

    let mut deleted = Vec::new();
    for name in self.cache.generations()? {
      if !self.expected.contains(&name) && self.cache.delete_generation(&name)? {
        deleted.push(name);
      }
    }

    self.cache.mark_activated(&self.generation)?;
    self.state.transition(GenerationState::Activated)?;
    info!(generation = %self.generation, deleted = ?deleted, "asset cache activated");

    Ok(deleted)
  }

  /// Answer a request: cache first, then network, then a fallback.
  pub async fn intercept(&self, request: &AssetRequest) -> Interception {
    if self.state != GenerationState::Activated
      || request.method != "GET"
      || request.url.port_or_known_default() == self.api_port
    {
      return Interception::Bypassed;
    }

    match self.cache.match_request(&self.generation, request, true) {
      Ok(Some(response)) => {
        return Interception::Served {
          response,
          from: ServedFrom::Cache,
        };
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "asset cache lookup failed"),
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() && response.kind == ResponseKind::Basic {
          if let Err(e) = self.cache.put(&self.generation, request, &response) {
            warn!(url = %request.url, error = %e, "failed to cache asset");
          }
        }
        Interception::Served {
          response,
          from: ServedFrom::Network,
        }
      }
      Err(e) => {
        if self.is_image(request) {
          if let Some(response) = self.fallback() {
            return Interception::Served {
              response,
              from: ServedFrom::Fallback,
            };
          }
        }
        warn!(url = %request.url, error = %e, "error connecting to the application");
        Interception::Served {
          response: offline_notice(),
          from: ServedFrom::OfflineNotice,
        }
      }
    }
  }

  fn is_image(&self, request: &AssetRequest) -> bool {
    request
      .extension()
      .map(|ext| self.image_extensions.contains(&ext))
      .unwrap_or(false)
  }

  fn fallback(&self) -> Option<AssetResponse> {
    let request = AssetRequest::for_path(&self.origin, &self.fallback_image).ok()?;
    match self.cache.match_request(&self.generation, &request, true) {
      Ok(found) => found,
      Err(e) => {
        warn!(error = %e, "fallback image lookup failed");
        None
      }
    }
  }
}

fn offline_notice() -> AssetResponse {
  AssetResponse {
    status: 404,
    status_text: OFFLINE_NOTICE.to_string(),
    kind: ResponseKind::Basic,
    content_type: Some("text/plain; charset=utf-8".to_string()),
    body: OFFLINE_NOTICE.as_bytes().to_vec(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{FetchError, FetchResult};
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  struct FakeFetcher {
    files: HashMap<String, AssetResponse>,
    online: AtomicBool,
    calls: AtomicUsize,
  }

  impl FakeFetcher {
    fn new(paths: &[&str]) -> Self {
      let files = paths
        .iter()
        .map(|p| (p.to_string(), ok_response(p)))
        .collect();
      Self {
        files,
        online: AtomicBool::new(true),
        calls: AtomicUsize::new(0),
      }
    }
  }

  #[async_trait]
  impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, request: &AssetRequest) -> FetchResult<AssetResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Unreachable("offline".to_string()));
      }
      Ok(
        self
          .files
          .get(request.url.path())
          .cloned()
          .unwrap_or(AssetResponse {
            status: 404,
            status_text: "Not Found".to_string(),
            kind: ResponseKind::Basic,
            content_type: None,
            body: Vec::new(),
          }),
      )
    }
  }

  fn ok_response(path: &str) -> AssetResponse {
    AssetResponse {
      status: 200,
      status_text: "OK".to_string(),
      kind: ResponseKind::Basic,
      content_type: None,
      body: path.as_bytes().to_vec(),
    }
  }

  fn config(generation: &str, manifest: &[&str]) -> AssetsConfig {
    AssetsConfig {
      generation: generation.to_string(),
      manifest: manifest.iter().map(|s| s.to_string()).collect(),
      ..AssetsConfig::default()
    }
  }

  const MANIFEST: &[&str] = &["/", "/restaurant.html", "/images/fallback.png"];

  async fn activated(fetcher: FakeFetcher) -> Interceptor<FakeFetcher> {
    let cache = AssetCache::open_in_memory().unwrap();
    let mut interceptor =
      Interceptor::new(cache, fetcher, &config("static-v1", MANIFEST), Some(1337)).unwrap();
    interceptor.install().await.unwrap();
    interceptor.activate().unwrap();
    interceptor
  }

  fn request(path: &str) -> AssetRequest {
    AssetRequest::for_path(&Url::parse("http://localhost:8000").unwrap(), path).unwrap()
  }

  fn served(interception: Interception) -> (AssetResponse, ServedFrom) {
    match interception {
      Interception::Served { response, from } => (response, from),
      Interception::Bypassed => panic!("request was bypassed"),
    }
  }

  #[tokio::test]
  async fn test_install_caches_manifest() {
    let cache = AssetCache::open_in_memory().unwrap();
    let mut interceptor = Interceptor::new(
      cache,
      FakeFetcher::new(MANIFEST),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();

    let report = interceptor.install().await.unwrap();
    assert_eq!(report.cached, 3);
    assert!(report.failed.is_empty());
    assert_eq!(interceptor.state(), GenerationState::Installed);
    assert_eq!(interceptor.cache().len("static-v1").unwrap(), 3);
  }

  #[tokio::test]
  async fn test_partial_manifest_stores_nothing() {
    let cache = AssetCache::open_in_memory().unwrap();
    let mut interceptor = Interceptor::new(
      cache,
      FakeFetcher::new(&["/"]),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();

    let report = interceptor.install().await.unwrap();
    assert_eq!(report.cached, 0);
    assert_eq!(report.failed, vec!["/restaurant.html", "/images/fallback.png"]);
    assert_eq!(interceptor.cache().len("static-v1").unwrap(), 0);
    assert_eq!(interceptor.state(), GenerationState::Installed);
  }

  #[tokio::test]
  async fn test_activation_deletes_only_unexpected_generations() {
    let cache = AssetCache::open_in_memory().unwrap();
    let mut old = Interceptor::new(
      cache,
      FakeFetcher::new(MANIFEST),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();
    old.install().await.unwrap();
    old.activate().unwrap();
    old.cache().open_generation("reviews-v1").unwrap();
    old.cache().open_generation("static-v0").unwrap();

    let Interceptor { cache, .. } = old;
    let mut new_config = config("static-v2", MANIFEST);
    new_config.keep_generations = vec!["reviews-v1".to_string()];
    let mut new =
      Interceptor::new(cache, FakeFetcher::new(MANIFEST), &new_config, Some(1337)).unwrap();
    assert_eq!(new.state(), GenerationState::Parsed);

    new.install().await.unwrap();
    let mut deleted = new.activate().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["static-v0", "static-v1"]);

    let mut remaining = new.cache().generations().unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["reviews-v1", "static-v2"]);
  }

  #[tokio::test]
  async fn test_requests_bypassed_before_activation() {
    let cache = AssetCache::open_in_memory().unwrap();
    let interceptor = Interceptor::new(
      cache,
      FakeFetcher::new(MANIFEST),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();
    assert_eq!(interceptor.intercept(&request("/")).await, Interception::Bypassed);
  }

  #[tokio::test]
  async fn test_api_port_is_bypassed() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    let api = AssetRequest::get(Url::parse("http://localhost:1337/restaurants").unwrap());
    assert_eq!(interceptor.intercept(&api).await, Interception::Bypassed);
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    let calls = interceptor.fetcher.calls.load(Ordering::SeqCst);

    let (response, from) = served(interceptor.intercept(&request("/restaurant.html?id=4")).await);
    assert_eq!(from, ServedFrom::Cache);
    assert_eq!(response.body, b"/restaurant.html");
    assert_eq!(interceptor.fetcher.calls.load(Ordering::SeqCst), calls);
  }

  #[tokio::test]
  async fn test_miss_is_fetched_and_cached() {
    let interceptor = activated(FakeFetcher::new(&[
      "/",
      "/restaurant.html",
      "/images/fallback.png",
      "/images/1_1x.webp",
    ]))
    .await;

    let (_, from) = served(interceptor.intercept(&request("/images/1_1x.webp")).await);
    assert_eq!(from, ServedFrom::Network);

    interceptor.fetcher.online.store(false, Ordering::SeqCst);
    let (response, from) = served(interceptor.intercept(&request("/images/1_1x.webp")).await);
    assert_eq!(from, ServedFrom::Cache);
    assert_eq!(response.body, b"/images/1_1x.webp");
  }

  #[tokio::test]
  async fn test_error_status_is_not_cached() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;

    let (response, from) = served(interceptor.intercept(&request("/missing.css")).await);
    assert_eq!(from, ServedFrom::Network);
    assert_eq!(response.status, 404);
    assert_eq!(interceptor.cache().len("static-v1").unwrap(), 3);
  }

  #[tokio::test]
  async fn test_failed_image_gets_fallback() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    interceptor.fetcher.online.store(false, Ordering::SeqCst);

    let (response, from) = served(interceptor.intercept(&request("/images/9_2x.webp")).await);
    assert_eq!(from, ServedFrom::Fallback);
    assert_eq!(response.body, b"/images/fallback.png");
  }

  #[tokio::test]
  async fn test_failed_page_gets_offline_notice() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    interceptor.fetcher.online.store(false, Ordering::SeqCst);

    let (response, from) = served(interceptor.intercept(&request("/about.html")).await);
    assert_eq!(from, ServedFrom::OfflineNotice);
    assert_eq!(response.status, 404);
    assert_eq!(response.body, OFFLINE_NOTICE.as_bytes());
  }

  #[tokio::test]
  async fn test_state_resumes_from_cache() {
    let interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    let Interceptor { cache, .. } = interceptor;

    let resumed = Interceptor::new(
      cache,
      FakeFetcher::new(MANIFEST),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();
    assert_eq!(resumed.state(), GenerationState::Activated);
  }

  #[tokio::test]
  async fn test_reinstall_requires_activation_after_restart() {
    let mut interceptor = activated(FakeFetcher::new(MANIFEST)).await;
    interceptor.install().await.unwrap();
    assert_eq!(interceptor.state(), GenerationState::Installed);
    assert_eq!(interceptor.intercept(&request("/")).await, Interception::Bypassed);

    let Interceptor { cache, .. } = interceptor;
    let resumed = Interceptor::new(
      cache,
      FakeFetcher::new(MANIFEST),
      &config("static-v1", MANIFEST),
      Some(1337),
    )
    .unwrap();
    assert_eq!(resumed.state(), GenerationState::Installed);
    assert_eq!(resumed.intercept(&request("/")).await, Interception::Bypassed);
  }
}
