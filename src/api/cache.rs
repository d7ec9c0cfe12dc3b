//! Caching implementations for review-server types.

use crate::cache::{Cacheable, Collection};

use super::types::{Restaurant, Review};

impl Cacheable for Restaurant {
  fn cache_key(&self) -> i64 {
    self.id
  }

  fn collection() -> Collection {
    Collection {
      table: "restaurants",
      index_column: None,
    }
  }
}

impl Cacheable for Review {
  fn cache_key(&self) -> i64 {
    self.id
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.restaurant_id)
  }

  fn collection() -> Collection {
    Collection {
      table: "reviews",
      index_column: Some("restaurant_id"),
    }
  }
}
