//! Local mirror of non-sensitive upstream data.
//!
//! This module provides a lossy, non-authoritative copy of subscriptions,
//! case summaries and communication metadata that:
//! - Is written through on every successful upstream fetch (best-effort)
//! - Serves as the fallback when the support API is unavailable
//! - Never stores communication subjects or bodies

mod layer;
mod storage;
mod traits;

pub use layer::Mirror;
pub use storage::{NoopMirror, SqliteMirror};
pub use traits::{Fetched, Sourced};
#[cfg(test)]
pub use traits::{DataSource, MirrorOutcome, MirrorStore};
