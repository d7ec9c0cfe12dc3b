//! What the front end currently shows.

use tracing::debug;

use crate::api::types::{NewReview, Restaurant, Review};
use crate::api::RemoteApi;
use crate::error::FetchResult;
use crate::store::{Filter, RestaurantStore, Submission};

/// Presentation state filled in by store operations.
#[derive(Debug, Default)]
pub struct Session {
  /// Restaurants matching the current filters
  pub restaurants: Vec<Restaurant>,
  pub neighborhoods: Vec<String>,
  pub cuisines: Vec<String>,
  pub cuisine: Filter,
  pub neighborhood: Filter,

  // Detail view
  pub restaurant: Option<Restaurant>,
  pub reviews: Vec<Review>,
  /// Review shown optimistically while it waits in the outbox
  pub pending: Option<NewReview>,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_filters(&mut self, cuisine: Filter, neighborhood: Filter) {
    self.cuisine = cuisine;
    self.neighborhood = neighborhood;
  }

  /// Populate the neighborhood and cuisine choices.
  pub async fn load_filters<A: RemoteApi>(
    &mut self,
    store: &RestaurantStore<A>,
  ) -> FetchResult<()> {
    self.neighborhoods = store.fetch_neighborhoods().await?;
    self.cuisines = store.fetch_cuisines().await?;
    Ok(())
  }

  /// Refill the restaurant list for the current filters.
  pub async fn update_restaurants<A: RemoteApi>(
    &mut self,
    store: &RestaurantStore<A>,
  ) -> FetchResult<&[Restaurant]> {
    self.restaurants = store
      .fetch_restaurants_by_cuisine_and_neighborhood(&self.cuisine, &self.neighborhood)
      .await?;
    debug!(count = self.restaurants.len(), "restaurant list updated");
    Ok(&self.restaurants)
  }

  /// Load one restaurant with its reviews.
  pub async fn open_restaurant<A: RemoteApi>(
    &mut self,
    store: &RestaurantStore<A>,
    id: i64,
  ) -> FetchResult<&Restaurant> {
    let restaurant = store.fetch_restaurant_by_id(id).await?;
    self.reviews = store.fetch_reviews_by_restaurant_id(id).await;
    self.pending = store
      .outbox()
      .pending()
      .ok()
      .flatten()
      .filter(|p| p.restaurant_id == id);
    Ok(&*self.restaurant.insert(restaurant))
  }

  /// Submit a review from the detail view.
  ///
  /// A queued review is kept in `pending` so it can be shown before the
  /// server has it; a sent one joins `reviews` when the server echoed it.
  pub async fn submit_review<A: RemoteApi>(
    &mut self,
    store: &RestaurantStore<A>,
    review: NewReview,
  ) -> FetchResult<Submission> {
    let submission = store.add_review(review.clone()).await?;
    match &submission {
      Submission::Queued => self.pending = Some(review),
      Submission::Sent(Some(created)) => self.reviews.push(created.clone()),
      Submission::Sent(None) => {}
    }
    Ok(submission)
  }

  /// Flip the favorite flag of the open restaurant.
  pub async fn toggle_favorite<A: RemoteApi>(
    &mut self,
    store: &RestaurantStore<A>,
  ) -> FetchResult<bool> {
    let Some(restaurant) = self.restaurant.as_mut() else {
      return Ok(false);
    };
    let is_favorite = !restaurant.is_favorite;
    store.toggle_favorite(restaurant.id, is_favorite).await?;
    restaurant.is_favorite = is_favorite;
    Ok(is_favorite)
  }
}
