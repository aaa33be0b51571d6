//! Realtime fan-out of case updates to connected observers.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionId = u64;

/// Events queued per observer before further events to it are dropped
pub const OBSERVER_QUEUE: usize = 64;

/// Events pushed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Notification {
  #[serde(rename = "communication-update")]
  CommunicationUpdate {
    #[serde(rename = "caseId")]
    case_id: String,
    update: UpdateKind,
  },
}

impl Notification {
  pub fn new_communication(case_id: impl Into<String>) -> Self {
    Notification::CommunicationUpdate {
      case_id: case_id.into(),
      update: UpdateKind::NewCommunication,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
  NewCommunication,
}

/// Receiving end handed to a connected observer
pub struct Observer {
  pub id: ConnectionId,
  pub events: mpsc::Receiver<Notification>,
}

struct Connection {
  tx: mpsc::Sender<Notification>,
  channels: HashSet<String>,
}

#[derive(Default)]
struct Registry {
  channels: HashMap<String, HashSet<ConnectionId>>,
  connections: HashMap<ConnectionId, Connection>,
}

impl Registry {
  fn leave(&mut self, id: ConnectionId, channel: &str) {
    if let Some(members) = self.channels.get_mut(channel) {
      members.remove(&id);
      if members.is_empty() {
        self.channels.remove(channel);
      }
    }
  }

  fn drop_connection(&mut self, id: ConnectionId) {
    if let Some(conn) = self.connections.remove(&id) {
      for channel in &conn.channels {
        self.leave(id, channel);
      }
    }
  }
}

/// Publish/subscribe registry keyed by subscription id.
///
/// Delivery is best-effort and at-most-once to observers connected at
/// publish time; nothing is replayed. Each observer receives events of a
/// channel in publish order. An observer whose queue is full misses the
/// event; publishing never waits on a slow reader.
pub struct Notifier {
  registry: Mutex<Registry>,
  next_id: AtomicU64,
  queue: usize,
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new()
  }
}

impl Notifier {
  pub fn new() -> Self {
    Self::with_queue(OBSERVER_QUEUE)
  }

  pub fn with_queue(queue: usize) -> Self {
    Self {
      registry: Mutex::new(Registry::default()),
      next_id: AtomicU64::new(1),
      queue: queue.max(1),
    }
  }

  /// Channel name for a subscription
  pub fn channel_key(subscription_id: &str) -> String {
    format!("subscription-{}", subscription_id)
  }

  fn registry(&self) -> MutexGuard<'_, Registry> {
    self
      .registry
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Register a new observer connection.
  pub fn connect(&self) -> Observer {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(self.queue);

    self.registry().connections.insert(
      id,
      Connection {
        tx,
        channels: HashSet::new(),
      },
    );
    tracing::debug!(connection = id, "observer connected");

    Observer { id, events: rx }
  }

  /// Join a connection to a subscription's channel. Returns false for unknown connections.
  pub fn subscribe(&self, id: ConnectionId, subscription_id: &str) -> bool {
    let channel = Self::channel_key(subscription_id);
    let mut registry = self.registry();

    let Some(conn) = registry.connections.get_mut(&id) else {
      return false;
    };
    conn.channels.insert(channel.clone());
    registry.channels.entry(channel).or_default().insert(id);
    true
  }

  pub fn unsubscribe(&self, id: ConnectionId, subscription_id: &str) {
    let channel = Self::channel_key(subscription_id);
    let mut registry = self.registry();

    if let Some(conn) = registry.connections.get_mut(&id) {
      conn.channels.remove(&channel);
    }
    registry.leave(id, &channel);
  }

  /// Remove a connection from every channel it joined.
  pub fn disconnect(&self, id: ConnectionId) {
    self.registry().drop_connection(id);
    tracing::debug!(connection = id, "observer disconnected");
  }

  /// Deliver `event` to every current member of the subscription's channel.
  ///
  /// Returns the number of observers the event was queued for. Observers
  /// whose receiver is gone are dropped from the registry.
  pub fn publish(&self, subscription_id: &str, event: Notification) -> usize {
    let channel = Self::channel_key(subscription_id);
    let mut registry = self.registry();

    let members: Vec<ConnectionId> = match registry.channels.get(&channel) {
      Some(members) => members.iter().copied().collect(),
      None => return 0,
    };

    let mut delivered = 0;
    let mut closed = Vec::new();
    for id in members {
      let Some(conn) = registry.connections.get(&id) else {
        closed.push(id);
        continue;
      };
      match conn.tx.try_send(event.clone()) {
        Ok(()) => delivered += 1,
        Err(TrySendError::Full(_)) => {
          tracing::warn!(connection = id, channel = %channel, "observer queue full, event dropped");
        }
        Err(TrySendError::Closed(_)) => closed.push(id),
      }
    }

    for id in closed {
      registry.drop_connection(id);
    }

    tracing::debug!(channel = %channel, delivered, "published");
    delivered
  }

  /// Number of observers currently joined to a subscription's channel
  #[cfg(test)]
  pub fn member_count(&self, subscription_id: &str) -> usize {
    self
      .registry()
      .channels
      .get(&Self::channel_key(subscription_id))
      .map_or(0, HashSet::len)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn test_notification_wire_format() {
    let json = serde_json::to_value(Notification::new_communication("T1")).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "event": "communication-update",
        "data": { "caseId": "T1", "update": "new-communication" }
      })
    );
  }

  #[test]
  fn test_publish_reaches_only_channel_members() {
    let notifier = Notifier::new();
    let mut a = notifier.connect();
    let mut b = notifier.connect();
    notifier.subscribe(a.id, "sub-A");
    notifier.subscribe(b.id, "sub-B");

    assert_eq!(notifier.publish("sub-A", Notification::new_communication("T1")), 1);

    assert_eq!(
      a.events.try_recv().unwrap(),
      Notification::new_communication("T1")
    );
    assert!(b.events.try_recv().is_err());
  }

  #[test]
  fn test_late_joiner_gets_no_backlog() {
    let notifier = Notifier::new();
    notifier.publish("sub-A", Notification::new_communication("T1"));

    let mut late = notifier.connect();
    notifier.subscribe(late.id, "sub-A");
    assert!(late.events.try_recv().is_err());
  }

  #[test]
  fn test_per_connection_order_matches_publish_order() {
    let notifier = Notifier::new();
    let mut obs = notifier.connect();
    notifier.subscribe(obs.id, "sub-A");

    for case in ["T1", "T2", "T3"] {
      notifier.publish("sub-A", Notification::new_communication(case));
    }

    for case in ["T1", "T2", "T3"] {
      assert_eq!(
        obs.events.try_recv().unwrap(),
        Notification::new_communication(case)
      );
    }
  }

  #[test]
  fn test_disconnect_leaves_every_channel() {
    let notifier = Notifier::new();
    let obs = notifier.connect();
    notifier.subscribe(obs.id, "sub-A");
    notifier.subscribe(obs.id, "sub-B");
    assert_eq!(notifier.member_count("sub-A"), 1);

    notifier.disconnect(obs.id);
    assert_eq!(notifier.member_count("sub-A"), 0);
    assert_eq!(notifier.member_count("sub-B"), 0);
    assert!(!notifier.subscribe(obs.id, "sub-C"));
  }

  #[test]
  fn test_unsubscribe_single_channel() {
    let notifier = Notifier::new();
    let mut obs = notifier.connect();
    notifier.subscribe(obs.id, "sub-A");
    notifier.subscribe(obs.id, "sub-B");
    notifier.unsubscribe(obs.id, "sub-A");

    assert_eq!(notifier.publish("sub-A", Notification::new_communication("T1")), 0);
    assert_eq!(notifier.publish("sub-B", Notification::new_communication("T2")), 1);
    assert_eq!(
      obs.events.try_recv().unwrap(),
      Notification::new_communication("T2")
    );
  }

  #[test]
  fn test_dropped_observer_is_pruned() {
    let notifier = Notifier::new();
    let obs = notifier.connect();
    notifier.subscribe(obs.id, "sub-A");
    drop(obs);

    assert_eq!(notifier.publish("sub-A", Notification::new_communication("T1")), 0);
    assert_eq!(notifier.member_count("sub-A"), 0);
  }

  #[tokio::test]
  async fn test_concurrent_join_and_publish() {
    let notifier = Arc::new(Notifier::new());
    let mut observers = Vec::new();
    for _ in 0..16 {
      let obs = notifier.connect();
      observers.push(obs);
    }

    let joins: Vec<_> = observers
      .iter()
      .map(|obs| {
        let notifier = notifier.clone();
        let id = obs.id;
        tokio::spawn(async move { notifier.subscribe(id, "sub-A") })
      })
      .collect();
    for join in joins {
      assert!(join.await.unwrap());
    }

    assert_eq!(notifier.publish("sub-A", Notification::new_communication("T1")), 16);
    for obs in &mut observers {
      assert!(obs.events.try_recv().is_ok());
    }
  }

  #[test]
  fn test_full_queue_drops_events_for_that_observer_only() {
    let notifier = Notifier::with_queue(2);
    let mut stalled = notifier.connect();
    let mut live = notifier.connect();
    notifier.subscribe(stalled.id, "sub-A");
    notifier.subscribe(live.id, "sub-A");

    let delivered: Vec<usize> = ["T1", "T2", "T3", "T4"]
      .into_iter()
      .map(|case| {
        let n = notifier.publish("sub-A", Notification::new_communication(case));
        live.events.try_recv().unwrap();
        n
      })
      .collect();

    assert_eq!(delivered, vec![2, 2, 1, 1]);
    // Still connected; it just missed what did not fit
    assert_eq!(notifier.member_count("sub-A"), 2);

    assert_eq!(
      stalled.events.try_recv().unwrap(),
      Notification::new_communication("T1")
    );
    assert_eq!(
      stalled.events.try_recv().unwrap(),
      Notification::new_communication("T2")
    );
    assert!(stalled.events.try_recv().is_err());
  }
}
