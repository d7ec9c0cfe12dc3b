//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use tracing::{debug, warn};

use super::storage::LocalStore;
use super::traits::{CacheResult, Cacheable};
use crate::error::FetchResult;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client. Every
/// operation branches on whether the local store is active; when it is not,
/// reads go straight to the network and local writes are skipped.
#[derive(Clone, Debug)]
pub struct CacheLayer {
  store: LocalStore,
}

impl CacheLayer {
  pub fn new(store: LocalStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  /// Read-through list fetch.
  ///
  /// 1. If the collection holds any record, return all of them (no freshness check)
  /// 2. Otherwise fetch from the network
  /// 3. Store each returned record keyed by its identifier
  pub async fn fetch_list<T, F, Fut>(&self, fetcher: F) -> FetchResult<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult<Vec<T>>>,
  {
    let storage = match &self.store {
      LocalStore::Active(storage) => storage,
      LocalStore::Unavailable => {
        let data = fetcher().await?;
        return Ok(CacheResult::from_network(data));
      }
    };

    match storage.get_all::<T>() {
      Ok(cached) if !cached.entities.is_empty() => {
        return Ok(CacheResult::from_cache(cached.entities, cached.cached_at));
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, table = T::collection().table, "failed to read local store"),
    }

    let data = fetcher().await?;
    if let Err(e) = storage.put_all(&data) {
      warn!(error = %e, table = T::collection().table, "failed to populate local store");
    }
    Ok(CacheResult::from_network(data))
  }

  /// Network-first fetch of the records sharing an index key.
  ///
  /// On success, records matching `index_key` are persisted and the network
  /// result is returned as-is. On any failure the local index lookup is
  /// returned instead, which may be empty.
  pub async fn fetch_indexed<T, F, Fut>(&self, index_key: i64, fetcher: F) -> CacheResult<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult<Vec<T>>>,
  {
    match fetcher().await {
      Ok(data) => {
        if let LocalStore::Active(storage) = &self.store {
          let matching: Vec<T> = data
            .iter()
            .filter(|r| r.index_key() == Some(index_key))
            .cloned()
            .collect();
          if let Err(e) = storage.put_all(&matching) {
            warn!(error = %e, table = T::collection().table, "failed to persist records");
          }
        }
        CacheResult::from_network(data)
      }
      Err(e) => {
        if e.is_network() {
          debug!(error = %e, index_key, "network unreachable, using local index");
        } else {
          warn!(error = %e, index_key, "unusable response, using local index");
        }
        let local = match &self.store {
          LocalStore::Active(storage) => storage.get_by_index::<T>(index_key).unwrap_or_else(|e| {
            warn!(error = %e, "local index lookup failed");
            Vec::new()
          }),
          LocalStore::Unavailable => Vec::new(),
        };
        CacheResult::offline(local, None)
      }
    }
  }

  /// Send a mutation, then apply it to the local copy once the network confirms.
  ///
  /// A failed send leaves the local record untouched. A missing local record,
  /// an unavailable store or a failing one means the mutation has no local
  /// effect; only the send decides the outcome.
  pub async fn write_after_confirm<T, F, Fut, A>(
    &self,
    key: i64,
    send: F,
    apply: A,
  ) -> FetchResult<()>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult<()>>,
    A: FnOnce(&mut T),
  {
    send().await?;

    let storage = match &self.store {
      LocalStore::Active(storage) => storage,
      LocalStore::Unavailable => return Ok(()),
    };

    let table = T::collection().table;
    match storage.get::<T>(key) {
      Ok(Some(cached)) => {
        debug!(key, cached_at = %cached.cached_at, "applying confirmed change to local copy");
        let mut entity = cached.entity;
        apply(&mut entity);
        if let Err(e) = storage.put(&entity) {
          warn!(error = %e, key, table, "failed to update local copy");
        }
      }
      Ok(None) => debug!(key, table, "no local copy to update"),
      Err(e) => warn!(error = %e, key, table, "failed to read local copy"),
    }

    Ok(())
  }

  /// Persist a single record if the store is active.
  pub fn store_one<T: Cacheable>(&self, entity: &T) -> FetchResult<()> {
    match &self.store {
      LocalStore::Active(storage) => Ok(storage.put(entity)?),
      LocalStore::Unavailable => Ok(()),
    }
  }

  /// Drop a single record if the store is active.
  pub fn remove_one<T: Cacheable>(&self, key: i64) -> FetchResult<()> {
    match &self.store {
      LocalStore::Active(storage) => {
        storage.delete::<T>(key)?;
        Ok(())
      }
      LocalStore::Unavailable => Ok(()),
    }
  }

  /// Forget every record of a collection so the next list fetch hits the network.
  pub fn invalidate<T: Cacheable>(&self) -> FetchResult<()> {
    match &self.store {
      LocalStore::Active(storage) => Ok(storage.clear::<T>()?),
      LocalStore::Unavailable => Ok(()),
    }
  }
}
