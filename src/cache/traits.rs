//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Where a record type lives in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collection {
  /// Table name
  pub table: &'static str,
  /// Secondary index column, for records that carry a foreign key
  pub index_column: Option<&'static str>,
}

/// Trait for records that can be mirrored in the local store.
///
/// Implementors provide an integer primary key and, when the collection is
/// indexed, the value of the foreign key the index covers.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier within the collection
  fn cache_key(&self) -> i64;

  /// Value of the secondary index (e.g. the owning restaurant of a review)
  fn index_key(&self) -> Option<i64> {
    None
  }

  fn collection() -> Collection;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from the local store without asking the network
  Cache,
  /// Network unavailable, serving whatever the local store holds
  Offline,
}
