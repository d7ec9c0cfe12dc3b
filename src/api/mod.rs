//! Client side of the review server API.

mod cache;
pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::FetchResult;
use types::{NewReview, Restaurant, Review};

pub use client::ApiClient;

/// Remote operations the local store manager depends on.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
  /// `GET /restaurants`
  async fn list_restaurants(&self) -> FetchResult<Vec<Restaurant>>;

  /// `GET /reviews?restaurant_id=<id>`
  async fn list_reviews(&self, restaurant_id: i64) -> FetchResult<Vec<Review>>;

  /// `PUT /restaurants/<id>/?is_favorite=<bool>`
  async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> FetchResult<()>;

  /// `POST /reviews`. Returns the created review when the server answers with JSON.
  async fn create_review(&self, review: &NewReview) -> FetchResult<Option<Review>>;

  /// `DELETE /reviews/<id>`
  async fn delete_review(&self, review_id: i64) -> FetchResult<()>;

  /// Whether the server answers at all.
  async fn is_reachable(&self) -> bool;
}
