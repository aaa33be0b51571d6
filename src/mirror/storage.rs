//! Mirror storage implementations.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::MirrorStore;
use crate::azure::types::{CommunicationRecord, Subscription, SupportCase};
use crate::error::{Error, Result};

/// Storage implementation that doesn't mirror anything.
/// Used when the mirror is disabled - writes are discarded, reads are empty.
pub struct NoopMirror;

impl MirrorStore for NoopMirror {
  fn upsert_subscriptions(&self, _subscriptions: &[Subscription]) -> Result<usize> {
    Ok(0)
  }

  fn upsert_cases(&self, _cases: &[SupportCase]) -> Result<usize> {
    Ok(0)
  }

  fn upsert_communications(&self, _records: &[CommunicationRecord]) -> Result<usize> {
    Ok(0)
  }

  fn subscriptions(&self) -> Result<Vec<Subscription>> {
    Ok(Vec::new())
  }

  fn cases_for(&self, _subscription_ids: &[String]) -> Result<Vec<SupportCase>> {
    Ok(Vec::new())
  }

  fn communications_for(&self, _case_id: &str) -> Result<Vec<CommunicationRecord>> {
    Ok(Vec::new())
  }
}

/// SQLite-backed mirror.
///
/// One connection shared behind a mutex, opened at startup and kept for the
/// life of the process.
pub struct SqliteMirror {
  conn: Mutex<Connection>,
}

/// Schema for mirror tables.
///
/// Foreign keys are declared for documentation only; SQLite leaves them
/// unenforced unless `PRAGMA foreign_keys` is on, and referential integrity
/// here is best-effort.
const MIRROR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    displayName TEXT NOT NULL,
    state TEXT,
    last_updated DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS support_cases (
    id TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL,
    title TEXT NOT NULL,
    severity TEXT,
    status TEXT,
    created_time DATETIME,
    last_updated DATETIME,
    service_name TEXT,
    FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
);

CREATE INDEX IF NOT EXISTS idx_support_cases_subscription
    ON support_cases(subscription_id);

CREATE TABLE IF NOT EXISTS case_communications (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    sender TEXT,
    created_time DATETIME,
    type TEXT,
    FOREIGN KEY (case_id) REFERENCES support_cases(id)
);

CREATE INDEX IF NOT EXISTS idx_case_communications_case
    ON case_communications(case_id);
"#;

impl SqliteMirror {
  /// Open or create the mirror database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Mirror(format!("Failed to create mirror directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Mirror(format!(
        "Failed to open mirror database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Private in-memory database, used by tests.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(MIRROR_SCHEMA)
      .map_err(|e| Error::Mirror(format!("Failed to run mirror migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Mirror(format!("Lock poisoned: {}", e)))
  }
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<SupportCase> {
  Ok(SupportCase {
    id: row.get(0)?,
    subscription_id: row.get(1)?,
    title: row.get(2)?,
    severity: row.get(3)?,
    status: row.get(4)?,
    created_time: row.get(5)?,
    last_updated: row.get(6)?,
    service_name: row.get(7)?,
  })
}

impl MirrorStore for SqliteMirror {
  fn upsert_subscriptions(&self, subscriptions: &[Subscription]) -> Result<usize> {
    let synced_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    {
      let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO subscriptions (id, displayName, state, last_updated)
         VALUES (?, ?, ?, ?)",
      )?;
      for sub in subscriptions {
        stmt.execute(params![sub.id, sub.display_name, sub.state, synced_at])?;
      }
    }
    tx.commit()?;
    Ok(subscriptions.len())
  }

  fn upsert_cases(&self, cases: &[SupportCase]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    {
      let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO support_cases
         (id, subscription_id, title, severity, status, created_time, last_updated, service_name)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      )?;
      for case in cases {
        stmt.execute(params![
          case.id,
          case.subscription_id,
          case.title,
          case.severity,
          case.status,
          case.created_time,
          case.last_updated,
          case.service_name
        ])?;
      }
    }
    tx.commit()?;
    Ok(cases.len())
  }

  fn upsert_communications(&self, records: &[CommunicationRecord]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    {
      let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO case_communications (id, case_id, sender, created_time, type)
         VALUES (?, ?, ?, ?, ?)",
      )?;
      for record in records {
        stmt.execute(params![
          record.id,
          record.case_id,
          record.sender,
          record.created_time,
          record.communication_type
        ])?;
      }
    }
    tx.commit()?;
    Ok(records.len())
  }

  fn subscriptions(&self) -> Result<Vec<Subscription>> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT id, displayName, state, last_updated FROM subscriptions ORDER BY id")?;

    let rows = stmt
      .query_map([], |row| {
        Ok(Subscription {
          id: row.get(0)?,
          display_name: row.get(1)?,
          state: row.get(2)?,
          last_synced: row.get(3)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  fn cases_for(&self, subscription_ids: &[String]) -> Result<Vec<SupportCase>> {
    if subscription_ids.is_empty() {
      return Ok(Vec::new());
    }

    let placeholders = vec!["?"; subscription_ids.len()].join(", ");
    let sql = format!(
      "SELECT id, subscription_id, title, severity, status, created_time, last_updated, service_name
       FROM support_cases
       WHERE subscription_id IN ({})
       ORDER BY last_updated DESC, id",
      placeholders
    );

    let conn = self.lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params_from_iter(subscription_ids.iter()), case_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  fn communications_for(&self, case_id: &str) -> Result<Vec<CommunicationRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, case_id, sender, created_time, type FROM case_communications
       WHERE case_id = ?
       ORDER BY created_time, id",
    )?;

    let rows = stmt
      .query_map(params![case_id], |row| {
        Ok(CommunicationRecord {
          id: row.get(0)?,
          case_id: row.get(1)?,
          sender: row.get(2)?,
          created_time: row.get(3)?,
          communication_type: row.get(4)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn case(id: &str, subscription_id: &str, title: &str) -> SupportCase {
    SupportCase {
      id: id.into(),
      subscription_id: subscription_id.into(),
      title: title.into(),
      severity: Some("moderate".into()),
      status: Some("Open".into()),
      created_time: Some("2024-01-01T00:00:00Z".into()),
      last_updated: Some("2024-01-02T00:00:00Z".into()),
      service_name: Some("Storage".into()),
    }
  }

  #[test]
  fn test_upsert_case_overwrites_every_field() {
    let mirror = SqliteMirror::open_in_memory().unwrap();
    mirror.upsert_cases(&[case("T1", "sub-A", "old title")]).unwrap();

    let updated = SupportCase {
      severity: None,
      status: Some("Closed".into()),
      service_name: None,
      ..case("T1", "sub-A", "new title")
    };
    mirror.upsert_cases(&[updated.clone()]).unwrap();

    let rows = mirror.cases_for(&["sub-A".to_string()]).unwrap();
    assert_eq!(rows, vec![updated]);
  }

  #[test]
  fn test_cases_for_returns_union_of_requested_subscriptions() {
    let mirror = SqliteMirror::open_in_memory().unwrap();
    mirror
      .upsert_cases(&[
        case("T1", "sub-A", "a"),
        case("T2", "sub-B", "b"),
        case("T3", "sub-C", "c"),
      ])
      .unwrap();

    let mut ids: Vec<String> = mirror
      .cases_for(&["sub-A".to_string(), "sub-B".to_string()])
      .unwrap()
      .into_iter()
      .map(|c| c.id)
      .collect();
    ids.sort();
    assert_eq!(ids, vec!["T1", "T2"]);

    assert!(mirror.cases_for(&[]).unwrap().is_empty());
  }

  #[test]
  fn test_subscription_upsert_stamps_sync_time() {
    let mirror = SqliteMirror::open_in_memory().unwrap();
    let sub = Subscription {
      id: "sub-A".into(),
      display_name: "Production".into(),
      state: Some("Enabled".into()),
      last_synced: None,
    };
    mirror.upsert_subscriptions(&[sub.clone()]).unwrap();
    mirror
      .upsert_subscriptions(&[Subscription {
        display_name: "Prod (renamed)".into(),
        ..sub
      }])
      .unwrap();

    let rows = mirror.subscriptions().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].display_name, "Prod (renamed)");
    assert!(rows[0].last_synced.is_some());
  }

  #[test]
  fn test_communication_metadata_round_trip() {
    let mirror = SqliteMirror::open_in_memory().unwrap();
    let record = CommunicationRecord {
      id: "m1".into(),
      case_id: "T1".into(),
      sender: Some("engineer@example.com".into()),
      created_time: Some("2024-01-03T00:00:00Z".into()),
      communication_type: Some("web".into()),
    };
    mirror.upsert_communications(&[record.clone()]).unwrap();
    mirror.upsert_communications(&[record.clone()]).unwrap();

    assert_eq!(mirror.communications_for("T1").unwrap(), vec![record]);
    assert!(mirror.communications_for("T2").unwrap().is_empty());
  }

  #[test]
  fn test_noop_mirror_discards_writes() {
    let mirror = NoopMirror;
    assert_eq!(mirror.upsert_cases(&[case("T1", "sub-A", "a")]).unwrap(), 0);
    assert!(mirror.cases_for(&["sub-A".to_string()]).unwrap().is_empty());
  }
}
