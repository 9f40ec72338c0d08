//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::request::Snapshot;
use super::traits::{CacheError, Result};

/// A cached response together with the generation that holds it.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub generation: String,
  pub response: Snapshot,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Summary of one stored cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
  pub name: String,
  pub created_at: DateTime<Utc>,
  pub entries: usize,
}

/// Trait for cache storage backends.
///
/// Every method is atomic with respect to the others. Generations only come
/// into existence through `put_all`, so a stored generation is always a fully
/// installed one.
pub trait CacheStorage: Send + Sync {
  /// All generations, oldest first.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Whether generation `name` has been installed.
  fn is_installed(&self, name: &str) -> Result<bool> {
    Ok(self.generations()?.iter().any(|g| g.name == name))
  }

  /// Find `key` in any generation, searching oldest first.
  fn lookup(&self, key: &str) -> Result<Option<StoredEntry>>;

  /// Store one entry in the active generation (the oldest one still stored).
  ///
  /// Returns the generation written to, or `None` when nothing is installed
  /// and the entry was dropped.
  fn put_active(&self, key: &str, response: &Snapshot) -> Result<Option<String>>;

  /// Install a generation with a batch of entries in one transaction;
  /// nothing is written on failure.
  fn put_all(&self, generation: &str, entries: &[(String, Snapshot)]) -> Result<()>;

  /// Drop a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for std::sync::Arc<T> {
  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    (**self).generations()
  }

  fn is_installed(&self, name: &str) -> Result<bool> {
    (**self).is_installed(name)
  }

  fn lookup(&self, key: &str) -> Result<Option<StoredEntry>> {
    (**self).lookup(key)
  }

  fn put_active(&self, key: &str, response: &Snapshot) -> Result<Option<String>> {
    (**self).put_active(key, response)
  }

  fn put_all(&self, generation: &str, entries: &[(String, Snapshot)]) -> Result<()> {
    (**self).put_all(generation, entries)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    (**self).delete_generation(name)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) cache storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Storage that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Storage(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per generation; seq records creation order
CREATE TABLE IF NOT EXISTS cache_generations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by generation + request hash
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);
"#;

fn ensure_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
    params![generation],
  )?;
  Ok(())
}

fn insert_entry(conn: &Connection, generation: &str, key: &str, response: &Snapshot) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| CacheError::Storage(format!("failed to serialize headers: {}", e)))?;

  conn.execute(
    "INSERT OR REPLACE INTO cache_entries (generation, key_hash, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      generation,
      key,
      response.url,
      response.status,
      headers,
      response.body
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare(
      "SELECT g.name, g.created_at, COUNT(e.key_hash) FROM cache_generations g
       LEFT JOIN cache_entries e ON e.generation = g.name
       GROUP BY g.seq
       ORDER BY g.seq",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(GenerationInfo {
          name,
          created_at: parse_datetime(&created_at)?,
          entries: entries.max(0) as usize,
        })
      })
      .collect()
  }

  fn is_installed(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found = conn
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![name],
        |_| Ok(()),
      )
      .optional()?;
    Ok(found.is_some())
  }

  fn lookup(&self, key: &str) -> Result<Option<StoredEntry>> {
    let conn = self.lock()?;

    let row: Option<(String, String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT e.generation, e.url, e.status, e.headers, e.body, e.cached_at
         FROM cache_entries e
         INNER JOIN cache_generations g ON g.name = e.generation
         WHERE e.key_hash = ?
         ORDER BY g.seq
         LIMIT 1",
        params![key],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()?;

    match row {
      Some((generation, url, status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| CacheError::Storage(format!("failed to parse cached headers: {}", e)))?;
        Ok(Some(StoredEntry {
          generation,
          response: Snapshot {
            url,
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_active(&self, key: &str, response: &Snapshot) -> Result<Option<String>> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let active: Option<String> = tx
      .query_row(
        "SELECT name FROM cache_generations ORDER BY seq LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()?;

    if let Some(generation) = &active {
      insert_entry(&tx, generation, key, response)?;
    }
    tx.commit()?;
    Ok(active)
  }

  fn put_all(&self, generation: &str, entries: &[(String, Snapshot)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    ensure_generation(&tx, generation)?;
    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )?;
    let removed = tx.execute(
      "DELETE FROM cache_generations WHERE name = ?",
      params![name],
    )?;
    tx.commit()?;
    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::Storage(format!("failed to parse datetime '{}': {}", s, e)))
}
