use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::types::{NewReview, Restaurant, Review};
use super::RemoteApi;
use crate::config::ApiConfig;
use crate::error::{FetchError, FetchResult};

/// HTTP client for the review server
#[derive(Clone, Debug)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base = parse_base_url(&config.url)?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// Port the server listens on; requests to it are never served from the asset cache.
  pub fn port(&self) -> Option<u16> {
    self.base.port_or_known_default()
  }

  fn endpoint(&self, path: &str) -> FetchResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| FetchError::Malformed(format!("bad endpoint {}: {}", path, e)))
  }
}

/// Parse the configured server URL, making sure relative joins keep its path.
fn parse_base_url(raw: &str) -> Result<Url> {
  let mut base = Url::parse(raw).map_err(|e| eyre!("Invalid API URL {}: {}", raw, e))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}

#[async_trait]
impl RemoteApi for ApiClient {
  async fn list_restaurants(&self) -> FetchResult<Vec<Restaurant>> {
    let url = self.endpoint("restaurants")?;
    debug!(%url, "fetching restaurants");

    let restaurants = self
      .http
      .get(url)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    Ok(restaurants)
  }

  async fn list_reviews(&self, restaurant_id: i64) -> FetchResult<Vec<Review>> {
    let mut url = self.endpoint("reviews")?;
    url
      .query_pairs_mut()
      .append_pair("restaurant_id", &restaurant_id.to_string());
    debug!(%url, "fetching reviews");

    let reviews = self
      .http
      .get(url)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    Ok(reviews)
  }

  async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> FetchResult<()> {
    let mut url = self.endpoint(&format!("restaurants/{}/", restaurant_id))?;
    url
      .query_pairs_mut()
      .append_pair("is_favorite", if is_favorite { "true" } else { "false" });

    // The body, if any, is not needed
    self.http.put(url).send().await?.error_for_status()?;
    Ok(())
  }

  async fn create_review(&self, review: &NewReview) -> FetchResult<Option<Review>> {
    let url = self.endpoint("reviews")?;

    let response = self
      .http
      .post(url)
      .json(review)
      .send()
      .await?
      .error_for_status()?;

    let is_json = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(|v| v.contains("application/json"))
      .unwrap_or(false);

    if !is_json {
      return Ok(None);
    }

    match response.json::<Review>().await {
      Ok(created) => Ok(Some(created)),
      Err(e) => {
        warn!(error = %e, "review accepted but response body was not a review");
        Ok(None)
      }
    }
  }

  async fn delete_review(&self, review_id: i64) -> FetchResult<()> {
    let url = self.endpoint(&format!("reviews/{}", review_id))?;

    let response = self.http.delete(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(FetchError::NotFound(format!("review {}", review_id)));
    }
    response.error_for_status()?;
    Ok(())
  }

  async fn is_reachable(&self) -> bool {
    // Any HTTP answer means the server is reachable
    self
      .http
      .head(self.base.clone())
      .timeout(Duration::from_secs(3))
      .send()
      .await
      .is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_base_url_gets_trailing_slash() {
    let base = parse_base_url("http://localhost:1337/api").unwrap();
    assert_eq!(base.join("reviews").unwrap().as_str(), "http://localhost:1337/api/reviews");
  }

  #[test]
  fn test_favorite_endpoint_shape() {
    let client = ApiClient::new(&ApiConfig::default()).unwrap();
    let mut url = client.endpoint("restaurants/4/").unwrap();
    url.query_pairs_mut().append_pair("is_favorite", "true");
    assert_eq!(url.as_str(), "http://localhost:1337/restaurants/4/?is_favorite=true");
    assert_eq!(client.port(), Some(1337));
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(parse_base_url("not a url").is_err());
  }
}
