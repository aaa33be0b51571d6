//! Async facade over a blocking mirror store.

use std::sync::Arc;

use super::traits::{MirrorOutcome, MirrorStore};
use crate::error::{Error, Result};

/// Shared handle to the mirror store.
///
/// Store calls are blocking SQLite work, so every call runs on the blocking
/// pool and request tasks only await its completion.
#[derive(Clone)]
pub struct Mirror {
  store: Arc<dyn MirrorStore>,
}

impl Mirror {
  pub fn new(store: impl MirrorStore + 'static) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  #[cfg(test)]
  pub fn from_shared(store: Arc<dyn MirrorStore>) -> Self {
    Self { store }
  }

  /// Run a read (or any fallible store call) off the async runtime.
  pub async fn read<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn MirrorStore) -> Result<T> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
      .await
      .map_err(|e| Error::Mirror(format!("mirror task failed: {}", e)))?
  }

  /// Best-effort write that piggybacks on an upstream fetch.
  ///
  /// Failures are logged and reported in the outcome, never returned as errors.
  pub async fn write_through<F>(&self, what: &'static str, op: F) -> MirrorOutcome
  where
    F: FnOnce(&dyn MirrorStore) -> Result<usize> + Send + 'static,
  {
    match self.read(op).await {
      Ok(rows) => {
        tracing::debug!(what, rows, "mirrored");
        MirrorOutcome::Written(rows)
      }
      Err(e) => {
        tracing::warn!(what, error = %e, "mirror write failed");
        MirrorOutcome::Failed(e.to_string())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::azure::types::{CommunicationRecord, Subscription, SupportCase};
  use crate::mirror::SqliteMirror;

  struct BrokenMirror;

  impl MirrorStore for BrokenMirror {
    fn upsert_subscriptions(&self, _: &[Subscription]) -> Result<usize> {
      Err(Error::Mirror("disk full".into()))
    }
    fn upsert_cases(&self, _: &[SupportCase]) -> Result<usize> {
      Err(Error::Mirror("disk full".into()))
    }
    fn upsert_communications(&self, _: &[CommunicationRecord]) -> Result<usize> {
      Err(Error::Mirror("disk full".into()))
    }
    fn subscriptions(&self) -> Result<Vec<Subscription>> {
      Err(Error::Mirror("disk full".into()))
    }
    fn cases_for(&self, _: &[String]) -> Result<Vec<SupportCase>> {
      Err(Error::Mirror("disk full".into()))
    }
    fn communications_for(&self, _: &str) -> Result<Vec<CommunicationRecord>> {
      Err(Error::Mirror("disk full".into()))
    }
  }

  #[tokio::test]
  async fn test_write_through_reports_rows() {
    let mirror = Mirror::new(SqliteMirror::open_in_memory().unwrap());
    let subs = vec![Subscription {
      id: "sub-A".into(),
      display_name: "A".into(),
      state: None,
      last_synced: None,
    }];

    let outcome = mirror
      .write_through("subscriptions", move |store| store.upsert_subscriptions(&subs))
      .await;
    assert_eq!(outcome, MirrorOutcome::Written(1));

    let rows = mirror.read(|store| store.subscriptions()).await.unwrap();
    assert_eq!(rows.len(), 1);
  }

  #[tokio::test]
  async fn test_write_through_swallows_failure() {
    let mirror = Mirror::new(BrokenMirror);
    let outcome = mirror
      .write_through("cases", |store| store.upsert_cases(&[]))
      .await;
    assert!(outcome.is_failed());

    // Reads still propagate so the caller can decide
    assert!(mirror.read(|store| store.subscriptions()).await.is_err());
  }
}
