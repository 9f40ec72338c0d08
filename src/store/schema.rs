//! Schema definition and upgrade path for the item store.

use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use super::StoreError;

/// Current schema version, recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// How long a connection waits on another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upgrade steps, indexed by the version they upgrade *from*.
const UPGRADES: &[&str] = &[
  // 0 -> 1: record table plus a non-unique title lookup index
  r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS by_title ON items(title);
"#,
];

/// Open a scoped connection and bring the schema up to date.
///
/// Safe to call before every operation: when the database is already at
/// `SCHEMA_VERSION` this is a single pragma read.
pub(super) fn connect(path: &Path) -> Result<Connection, StoreError> {
  let mut conn = Connection::open(path)
    .map_err(|e| StoreError::Storage(format!("failed to open {}: {}", path.display(), e)))?;
  conn.busy_timeout(BUSY_TIMEOUT)?;
  upgrade(&mut conn)?;
  Ok(conn)
}

fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
  conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn upgrade(conn: &mut Connection) -> Result<(), StoreError> {
  if user_version(conn)? >= SCHEMA_VERSION {
    return Ok(());
  }

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  // Another connection may have finished the upgrade while we waited for the lock.
  let current = user_version(&tx)?;
  if current >= SCHEMA_VERSION {
    return Ok(());
  }

  for (from, step) in UPGRADES.iter().enumerate().skip(current.max(0) as usize) {
    tracing::info!(from, to = from + 1, "Upgrading item store schema");
    tx.execute_batch(step)?;
  }

  tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  tx.commit()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_upgrades_cover_every_version() {
    assert_eq!(UPGRADES.len(), SCHEMA_VERSION as usize);
  }

  #[test]
  fn test_connect_creates_table_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let conn = connect(&path).unwrap();
    assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);

    let table: String = conn
      .query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        ["items"],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(table, "items");

    let index_table: String = conn
      .query_row(
        "SELECT tbl_name FROM sqlite_master WHERE type = 'index' AND name = 'by_title'",
        [],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(index_table, "items");
  }

  #[test]
  fn test_connect_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    drop(connect(&path).unwrap());
    let conn = connect(&path).unwrap();
    assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);
  }
}
