//! Core traits and types for the local mirror.

use crate::azure::types::{CommunicationRecord, Subscription, SupportCase};
use crate::error::Result;

/// Storage backend for the non-authoritative local copy of upstream data.
///
/// Upserts insert-or-overwrite by primary key; nothing is ever deleted.
/// Implementations must be safe to call from many request tasks at once.
pub trait MirrorStore: Send + Sync {
  /// Upsert subscriptions, stamping each with the sync time. Returns rows written.
  fn upsert_subscriptions(&self, subscriptions: &[Subscription]) -> Result<usize>;

  /// Upsert case summaries by case id.
  fn upsert_cases(&self, cases: &[SupportCase]) -> Result<usize>;

  /// Upsert communication metadata by communication id.
  fn upsert_communications(&self, records: &[CommunicationRecord]) -> Result<usize>;

  /// All mirrored subscriptions.
  fn subscriptions(&self) -> Result<Vec<Subscription>>;

  /// Mirrored cases belonging to any of `subscription_ids`.
  fn cases_for(&self, subscription_ids: &[String]) -> Result<Vec<SupportCase>>;

  /// Mirrored communication metadata for one case.
  #[allow(dead_code)]
  fn communications_for(&self, case_id: &str) -> Result<Vec<CommunicationRecord>>;
}

/// Outcome of the best-effort write-through that piggybacks on a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
  /// Rows were upserted (0 when the mirror is disabled)
  Written(usize),
  /// The write failed; the fetch itself still succeeded
  Failed(String),
}

impl MirrorOutcome {
  #[cfg(test)]
  pub fn is_failed(&self) -> bool {
    matches!(self, MirrorOutcome::Failed(_))
  }
}

/// Primary result of an upstream call paired with its mirror side-effect.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub mirror: MirrorOutcome,
}

/// Result from a fallback-capable read, with where the data came from.
#[derive(Debug, Clone)]
pub struct Sourced<T> {
  pub data: T,
  pub source: DataSource,
}

impl<T> Sourced<T> {
  pub fn upstream(data: T) -> Self {
    Self {
      data,
      source: DataSource::Upstream,
    }
  }

  pub fn mirror(data: T) -> Self {
    Self {
      data,
      source: DataSource::Mirror,
    }
  }

  pub fn partial(data: T) -> Self {
    Self {
      data,
      source: DataSource::Partial,
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Fresh from the support API
  Upstream,
  /// Upstream unavailable, served from the local mirror
  Mirror,
  /// Some parts live, the rest from the mirror
  Partial,
}

impl DataSource {
  pub fn as_str(self) -> &'static str {
    match self {
      DataSource::Upstream => "upstream",
      DataSource::Mirror => "mirror",
      DataSource::Partial => "partial",
    }
  }
}
