use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::RemoteApi;

/// Online/offline state shared between the monitor and its subscribers
#[derive(Clone, Debug)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Publish a new state. Subscribers only wake on actual transitions.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Resolve once the state is online. Returns false if the sender is gone.
  pub async fn back_online(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|online| *online).await.is_ok()
  }

  /// Check the server every `interval` and publish the result.
  pub fn spawn_monitor<A: RemoteApi>(&self, api: Arc<A>, interval: Duration) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = api.is_reachable().await;
        this.set_online(online);
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_back_online_waits_for_transition() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    let waiter = tokio::spawn(async move { Connectivity::back_online(&mut rx).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    connectivity.set_online(true);
    let fired = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(fired);
  }

  #[tokio::test]
  async fn test_same_state_does_not_notify() {
    let connectivity = Connectivity::new(true);
    let mut rx = connectivity.subscribe();
    rx.borrow_and_update();

    connectivity.set_online(true);
    assert!(!rx.has_changed().unwrap());

    connectivity.set_online(false);
    assert!(rx.has_changed().unwrap());
    assert!(!connectivity.is_online());
  }
}
