//! Single-slot buffer for a review written while offline.
//!
//! The slot holds at most one review: a later submission replaces an earlier
//! one that has not been sent yet. While a review is pending, one background
//! task waits for connectivity to return and then sends it exactly once. The
//! slot is mirrored in the `pending_review` table so a review queued by a
//! previous run survives a restart.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::types::NewReview;
use crate::api::RemoteApi;
use crate::cache::{CacheLayer, LocalStore};
use crate::connectivity::Connectivity;

/// Outcome of the last send attempted by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  /// Nothing was pending
  Idle,
  Sent,
  /// The server rejected the review or could not be reached; it is not retried
  Failed,
  /// The subscription task was aborted before it finished
  Cancelled,
}

#[derive(Default)]
struct Slot {
  pending: Option<NewReview>,
  /// Reconnection subscription, alive while a review is pending
  subscription: Option<JoinHandle<Delivery>>,
}

pub struct ReviewOutbox<A: RemoteApi> {
  api: Arc<A>,
  cache: CacheLayer,
  connectivity: Connectivity,
  slot: Arc<Mutex<Slot>>,
}

impl<A: RemoteApi> ReviewOutbox<A> {
  pub fn new(api: Arc<A>, cache: CacheLayer, connectivity: Connectivity) -> Self {
    Self {
      api,
      cache,
      connectivity,
      slot: Arc::new(Mutex::new(Slot::default())),
    }
  }

  /// Hold `review` until the next time the device is online.
  pub fn queue(&self, review: NewReview) -> Result<()> {
    let mut slot = self.lock()?;
    persist(self.cache.store(), Some(&review))?;

    if let Some(previous) = slot.pending.replace(review) {
      debug!(restaurant_id = previous.restaurant_id, "discarding earlier pending review");
    }
    info!("review queued until connectivity returns");

    if slot.subscription.is_none() {
      slot.subscription = Some(self.subscribe());
    }
    Ok(())
  }

  /// Reload a review left pending by a previous run and wait for connectivity again.
  pub fn restore(&self) -> Result<bool> {
    let Some(review) = load(self.cache.store())? else {
      return Ok(false);
    };

    let mut slot = self.lock()?;
    if slot.pending.is_none() {
      slot.pending = Some(review);
    }
    if slot.subscription.is_none() {
      slot.subscription = Some(self.subscribe());
    }
    info!("restored pending review from a previous session");
    Ok(true)
  }

  /// The review currently waiting to be sent.
  pub fn pending(&self) -> Result<Option<NewReview>> {
    Ok(self.lock()?.pending.clone())
  }

  /// Wait until the pending review has been sent (or the subscription
  /// cancelled) and report what happened to it.
  pub async fn settled(&self) -> Delivery {
    let handle = match self.lock() {
      Ok(mut slot) => slot.subscription.take(),
      Err(_) => None,
    };
    match handle {
      Some(handle) => handle.await.unwrap_or(Delivery::Cancelled),
      None => Delivery::Idle,
    }
  }

  /// Drop the reconnection subscription. The review stays pending on disk.
  pub fn cancel(&self) {
    if let Ok(mut slot) = self.lock() {
      if let Some(handle) = slot.subscription.take() {
        handle.abort();
      }
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Slot>> {
    self.slot.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn subscribe(&self) -> JoinHandle<Delivery> {
    let api = Arc::clone(&self.api);
    let cache = self.cache.clone();
    let slot = Arc::clone(&self.slot);
    let mut rx = self.connectivity.subscribe();

    tokio::spawn(async move {
      let mut last = Delivery::Idle;
      loop {
        if !Connectivity::back_online(&mut rx).await {
          return last;
        }

        let Some(review) = take_pending(&slot, cache.store()) else {
          return last;
        };

        last = match api.create_review(&review).await {
          Ok(Some(created)) => {
            info!(review_id = created.id, "pending review sent");
            if let Err(e) = cache.store_one(&created) {
              warn!(error = %e, "failed to store sent review");
            }
            Delivery::Sent
          }
          Ok(None) => {
            info!("pending review sent");
            Delivery::Sent
          }
          Err(e) => {
            error!(error = %e, "failed to send pending review");
            Delivery::Failed
          }
        };
      }
    })
  }
}

/// Take the pending review and clear its persisted copy, or end the
/// subscription when there is none. Both happen under the slot lock so a
/// concurrent `queue` is never wiped from disk.
fn take_pending(slot: &Mutex<Slot>, store: &LocalStore) -> Option<NewReview> {
  let mut slot = slot.lock().ok()?;
  let review = slot.pending.take();
  match &review {
    Some(_) => {
      if let Err(e) = persist(store, None) {
        warn!(error = %e, "failed to clear pending review");
      }
    }
    None => slot.subscription = None,
  }
  review
}

fn persist(store: &LocalStore, review: Option<&NewReview>) -> Result<()> {
  let Ok(storage) = store.storage() else {
    return Ok(());
  };
  let conn = storage.database().conn()?;

  match review {
    Some(review) => {
      let data =
        serde_json::to_vec(review).map_err(|e| eyre!("Failed to serialize review: {}", e))?;
      conn
        .execute(
          "INSERT OR REPLACE INTO pending_review (slot, data, queued_at)
           VALUES (1, ?, datetime('now'))",
          params![data],
        )
        .map_err(|e| eyre!("Failed to store pending review: {}", e))?;
    }
    None => {
      conn
        .execute("DELETE FROM pending_review", [])
        .map_err(|e| eyre!("Failed to clear pending review: {}", e))?;
    }
  }
  Ok(())
}

fn load(store: &LocalStore) -> Result<Option<NewReview>> {
  let Ok(storage) = store.storage() else {
    return Ok(None);
  };
  let conn = storage.database().conn()?;

  let data: Option<Vec<u8>> = conn
    .query_row("SELECT data FROM pending_review WHERE slot = 1", [], |row| {
      row.get(0)
    })
    .optional()
    .map_err(|e| eyre!("Failed to read pending review: {}", e))?;

  let Some(data) = data else {
    return Ok(None);
  };

  match serde_json::from_slice(&data) {
    Ok(review) => Ok(Some(review)),
    Err(e) => {
      warn!(error = %e, "discarding unreadable pending review");
      conn
        .execute("DELETE FROM pending_review", [])
        .map_err(|e| eyre!("Failed to clear pending review: {}", e))?;
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeApi;
  use std::time::Duration;

  fn new_review(name: &str) -> NewReview {
    NewReview {
      restaurant_id: 1,
      name: name.to_string(),
      rating: 5,
      comments: format!("from {}", name),
    }
  }

  fn outbox(api: Arc<FakeApi>, connectivity: &Connectivity) -> ReviewOutbox<FakeApi> {
    let cache = CacheLayer::new(LocalStore::in_memory().unwrap());
    ReviewOutbox::new(api, cache, connectivity.clone())
  }

  #[tokio::test]
  async fn test_last_write_wins_on_reconnect() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let connectivity = Connectivity::new(false);
    let outbox = outbox(api.clone(), &connectivity);

    outbox.queue(new_review("first")).unwrap();
    outbox.queue(new_review("second")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.call_count("create_review"), 0);

    connectivity.set_online(true);
    let delivery = tokio::time::timeout(Duration::from_secs(1), outbox.settled())
      .await
      .unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let posted = api.posted.lock().unwrap().clone();
    assert_eq!(posted, vec![new_review("second")]);
    assert!(outbox.pending().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_sent_exactly_once() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let connectivity = Connectivity::new(false);
    let outbox = outbox(api.clone(), &connectivity);

    outbox.queue(new_review("only")).unwrap();
    connectivity.set_online(true);
    tokio::time::timeout(Duration::from_secs(1), outbox.settled())
      .await
      .unwrap();

    connectivity.set_online(false);
    connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.call_count("create_review"), 1);
  }

  #[tokio::test]
  async fn test_failed_send_is_not_retried() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    api.set_online(false);
    let connectivity = Connectivity::new(false);
    let outbox = outbox(api.clone(), &connectivity);

    outbox.queue(new_review("lost")).unwrap();
    connectivity.set_online(true);
    let delivery = tokio::time::timeout(Duration::from_secs(1), outbox.settled())
      .await
      .unwrap();
    assert_eq!(delivery, Delivery::Failed);

    assert_eq!(api.call_count("create_review"), 1);
    assert!(api.posted.lock().unwrap().is_empty());
    assert!(outbox.pending().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_pending_review_survives_restart() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let connectivity = Connectivity::new(false);
    let store = LocalStore::in_memory().unwrap();

    let first = ReviewOutbox::new(
      api.clone(),
      CacheLayer::new(store.clone()),
      connectivity.clone(),
    );
    first.queue(new_review("persisted")).unwrap();
    first.cancel();
    drop(first);

    let second = ReviewOutbox::new(api.clone(), CacheLayer::new(store), connectivity.clone());
    assert!(second.restore().unwrap());
    assert_eq!(second.pending().unwrap(), Some(new_review("persisted")));

    connectivity.set_online(true);
    tokio::time::timeout(Duration::from_secs(1), second.settled())
      .await
      .unwrap();
    assert_eq!(api.posted.lock().unwrap().len(), 1);
    assert!(!second.restore().unwrap());
  }

  #[tokio::test]
  async fn test_settled_without_pending_is_idle() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let outbox = outbox(api, &Connectivity::new(false));
    assert_eq!(outbox.settled().await, Delivery::Idle);

    outbox.queue(new_review("cancelled")).unwrap();
    outbox.cancel();
    assert_eq!(outbox.settled().await, Delivery::Idle);
  }

  #[tokio::test]
  async fn test_unreadable_pending_review_is_discarded() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let store = LocalStore::in_memory().unwrap();
    store
      .storage()
      .unwrap()
      .database()
      .conn()
      .unwrap()
      .execute(
        "INSERT INTO pending_review (slot, data) VALUES (1, x'7b6e6f7421')",
        [],
      )
      .unwrap();

    let outbox = ReviewOutbox::new(api, CacheLayer::new(store.clone()), Connectivity::new(false));
    assert!(!outbox.restore().unwrap());
    assert!(outbox.pending().unwrap().is_none());
    assert!(load(&store).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_review_queued_after_take_stays_on_disk() {
    let api = Arc::new(FakeApi::new(vec![], vec![]));
    let store = LocalStore::in_memory().unwrap();
    let outbox = ReviewOutbox::new(api, CacheLayer::new(store.clone()), Connectivity::new(false));

    outbox.queue(new_review("taken")).unwrap();
    assert_eq!(take_pending(&outbox.slot, &store), Some(new_review("taken")));
    assert!(load(&store).unwrap().is_none());

    outbox.queue(new_review("newer")).unwrap();
    assert_eq!(load(&store).unwrap(), Some(new_review("newer")));
    outbox.cancel();
  }
}
