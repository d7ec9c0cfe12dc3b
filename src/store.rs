//! Offline-aware access to restaurants and reviews.
//!
//! Wraps a [`RemoteApi`] with the local store: restaurant lists are read
//! through the store, reviews are fetched network-first with a local
//! fallback, and mutations reach the local copy only once the server has
//! accepted them.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::types::{NewReview, Restaurant, Review};
use crate::api::RemoteApi;
use crate::cache::{CacheLayer, CacheSource, LocalStore};
use crate::connectivity::Connectivity;
use crate::error::{FetchError, FetchResult};
use crate::outbox::ReviewOutbox;

/// Sentinel that disables filtering on a dimension
pub const ALL: &str = "all";

/// Filter on one restaurant attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
  #[default]
  All,
  Only(String),
}

impl Filter {
  pub fn parse(value: &str) -> Self {
    if value == ALL {
      Self::All
    } else {
      Self::Only(value.to_string())
    }
  }

  fn matches(&self, value: &str) -> bool {
    match self {
      Self::All => true,
      Self::Only(wanted) => wanted == value,
    }
  }
}

impl From<Option<&str>> for Filter {
  fn from(value: Option<&str>) -> Self {
    value.map(Filter::parse).unwrap_or_default()
  }
}

/// What happened to a submitted review.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
  /// Accepted by the server; carries the created record when the server returned one
  Sent(Option<Review>),
  /// Offline: held in the outbox until connectivity returns
  Queued,
}

/// Restaurant and review access with transparent local caching.
pub struct RestaurantStore<A: RemoteApi> {
  api: Arc<A>,
  cache: CacheLayer,
  connectivity: Connectivity,
  outbox: ReviewOutbox<A>,
}

impl<A: RemoteApi> RestaurantStore<A> {
  pub fn new(api: Arc<A>, store: LocalStore, connectivity: Connectivity) -> Self {
    let cache = CacheLayer::new(store);
    let outbox = ReviewOutbox::new(Arc::clone(&api), cache.clone(), connectivity.clone());
    Self {
      api,
      cache,
      connectivity,
      outbox,
    }
  }

  pub fn local_store(&self) -> &LocalStore {
    self.cache.store()
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn outbox(&self) -> &ReviewOutbox<A> {
    &self.outbox
  }

  /// All restaurants, served from the local store whenever it holds any.
  pub async fn fetch_restaurants(&self) -> FetchResult<Vec<Restaurant>> {
    let result = self
      .cache
      .fetch_list(|| {
        let api = Arc::clone(&self.api);
        async move { api.list_restaurants().await }
      })
      .await?;

    if result.source == CacheSource::Cache {
      debug!(
        count = result.data.len(),
        cached_at = ?result.cached_at,
        "restaurants served from local store"
      );
    }
    Ok(result.data)
  }

  /// Drop the local restaurant list and fetch it again.
  pub async fn refresh_restaurants(&self) -> FetchResult<Vec<Restaurant>> {
    self.cache.invalidate::<Restaurant>()?;
    self.fetch_restaurants().await
  }

  pub async fn fetch_restaurant_by_id(&self, id: i64) -> FetchResult<Restaurant> {
    self
      .fetch_restaurants()
      .await?
      .into_iter()
      .find(|r| r.id == id)
      .ok_or_else(|| FetchError::NotFound(format!("restaurant {}", id)))
  }

  pub async fn fetch_restaurants_by_cuisine(&self, cuisine: &str) -> FetchResult<Vec<Restaurant>> {
    self
      .fetch_restaurants_by_cuisine_and_neighborhood(
        &Filter::Only(cuisine.to_string()),
        &Filter::All,
      )
      .await
  }

  pub async fn fetch_restaurants_by_neighborhood(
    &self,
    neighborhood: &str,
  ) -> FetchResult<Vec<Restaurant>> {
    self
      .fetch_restaurants_by_cuisine_and_neighborhood(
        &Filter::All,
        &Filter::Only(neighborhood.to_string()),
      )
      .await
  }

  pub async fn fetch_restaurants_by_cuisine_and_neighborhood(
    &self,
    cuisine: &Filter,
    neighborhood: &Filter,
  ) -> FetchResult<Vec<Restaurant>> {
    let restaurants = self.fetch_restaurants().await?;
    Ok(
      restaurants
        .into_iter()
        .filter(|r| cuisine.matches(&r.cuisine_type))
        .filter(|r| neighborhood.matches(&r.neighborhood))
        .collect(),
    )
  }

  /// Distinct neighborhoods in first-seen order.
  pub async fn fetch_neighborhoods(&self) -> FetchResult<Vec<String>> {
    let restaurants = self.fetch_restaurants().await?;
    Ok(unique(restaurants.iter().map(|r| r.neighborhood.as_str())))
  }

  /// Distinct cuisines in first-seen order.
  pub async fn fetch_cuisines(&self) -> FetchResult<Vec<String>> {
    let restaurants = self.fetch_restaurants().await?;
    Ok(unique(restaurants.iter().map(|r| r.cuisine_type.as_str())))
  }

  /// Reviews of one restaurant: from the network when reachable, otherwise
  /// whatever the local store holds (possibly nothing).
  pub async fn fetch_reviews_by_restaurant_id(&self, restaurant_id: i64) -> Vec<Review> {
    let result = self
      .cache
      .fetch_indexed(restaurant_id, || {
        let api = Arc::clone(&self.api);
        async move { api.list_reviews(restaurant_id).await }
      })
      .await;

    if result.source == CacheSource::Offline {
      info!(
        restaurant_id,
        count = result.data.len(),
        "reviews served from local store"
      );
    }
    result.data
  }

  /// Mark a restaurant as favorite (or not). The local copy changes only
  /// after the server confirms.
  pub async fn toggle_favorite(&self, restaurant_id: i64, is_favorite: bool) -> FetchResult<()> {
    let result = self
      .cache
      .write_after_confirm::<Restaurant, _, _, _>(
        restaurant_id,
        || {
          let api = Arc::clone(&self.api);
          async move { api.set_favorite(restaurant_id, is_favorite).await }
        },
        |restaurant| restaurant.is_favorite = is_favorite,
      )
      .await;

    if let Err(e) = &result {
      error!(restaurant_id, error = %e, "failed to update favorite");
    }
    result
  }

  /// Submit a review now, or hold it until connectivity returns.
  pub async fn add_review(&self, review: NewReview) -> FetchResult<Submission> {
    if !self.connectivity.is_online() {
      self.outbox.queue(review)?;
      return Ok(Submission::Queued);
    }

    match self.api.create_review(&review).await {
      Ok(created) => {
        if let Some(created) = &created {
          if let Err(e) = self.cache.store_one(created) {
            warn!(error = %e, "failed to store created review");
          }
        }
        Ok(Submission::Sent(created))
      }
      Err(e) => {
        error!(restaurant_id = review.restaurant_id, error = %e, "failed to submit review");
        Err(e)
      }
    }
  }

  /// Delete a review on the server, then drop the local copy.
  pub async fn delete_review(&self, review_id: i64) -> FetchResult<()> {
    if let Err(e) = self.api.delete_review(review_id).await {
      error!(review_id, error = %e, "failed to delete review");
      return Err(e);
    }
    self.cache.remove_one::<Review>(review_id)?;
    info!(review_id, "review deleted");
    Ok(())
  }

  /// Re-arm a review left pending by an earlier run.
  pub fn restore_pending(&self) -> Result<bool> {
    self.outbox.restore()
  }
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
  let mut seen: Vec<String> = Vec::new();
  for v in values {
    if !seen.iter().any(|s| s == v) {
      seen.push(v.to_string());
    }
  }
  seen
}

/// Page link for a restaurant.
pub fn url_for_restaurant(restaurant: &Restaurant) -> String {
  format!("./restaurant.html?id={}", restaurant.id)
}

/// Image path without size suffix or extension.
pub fn image_url_for_restaurant(restaurant: &Restaurant) -> String {
  match restaurant.photograph() {
    Some(photo) => format!("/images/{}", photo),
    None => format!("/images/{}", restaurant.id),
  }
}

/// Responsive image candidates for a restaurant.
pub fn image_srcset(restaurant: &Restaurant) -> String {
  let base = image_url_for_restaurant(restaurant);
  format!("{}_1x.webp 300w, {}_2x.webp 600w", base, base)
}
