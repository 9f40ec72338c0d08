//! Local item store.
//!
//! A single-table SQLite store for list items:
//! - Every operation opens its own connection, upgrades the schema if needed,
//!   runs exactly one transaction and releases the connection
//! - Identifiers come from `AUTOINCREMENT` and are never reused
//! - `get_all` returns a snapshot ordered by `updated_at`, newest first

mod schema;
mod types;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use schema::SCHEMA_VERSION;
pub use types::{Item, ItemPatch, NewItem};

/// Failures surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
  /// `update` targeted an identifier with no record
  #[error("item {0} not found")]
  NotFound(i64),

  /// The database could not be opened, read or written
  #[error("storage error: {0}")]
  Storage(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Storage(e.to_string())
  }
}

impl From<tokio::task::JoinError> for StoreError {
  fn from(e: tokio::task::JoinError) -> Self {
    StoreError::Storage(format!("store task failed: {}", e))
  }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to a named item store on disk.
///
/// Cloning is cheap; clones address the same database file.
#[derive(Debug, Clone)]
pub struct ItemStore {
  name: Arc<str>,
  path: Arc<PathBuf>,
}

impl ItemStore {
  /// Address the store `name` inside `data_dir`. Nothing is opened until the
  /// first operation runs.
  pub fn open_in(data_dir: &Path, name: &str) -> Result<Self> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
      StoreError::Storage(format!(
        "failed to create data directory {}: {}",
        data_dir.display(),
        e
      ))
    })?;

    Ok(Self {
      name: Arc::from(name),
      path: Arc::new(data_dir.join(format!("{}.db", name))),
    })
  }

  /// Store identifier.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Run `f` on a fresh connection off the async runtime.
  async fn with_connection<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let path = Arc::clone(&self.path);
    tokio::task::spawn_blocking(move || {
      let mut conn = schema::connect(&path)?;
      f(&mut conn)
    })
    .await?
  }

  /// Create an item. Both timestamps are set to the current time.
  pub async fn add(&self, new: NewItem) -> Result<Item> {
    self
      .with_connection(move |conn| {
        let now = now_millis();
        let mut item = Item {
          id: 0,
          title: new.title,
          details: new.details.unwrap_or_default(),
          created_at: now,
          updated_at: now,
        };

        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO items (title, details, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
          params![item.title, item.details, item.created_at, item.updated_at],
        )?;
        item.id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id = item.id, "Added item");
        Ok(item)
      })
      .await
  }

  /// All items, most recently updated first.
  pub async fn get_all(&self) -> Result<Vec<Item>> {
    self
      .with_connection(|conn| {
        let tx = conn.transaction()?;
        let items = {
          let mut stmt = tx.prepare(&format!(
            "SELECT {} FROM items ORDER BY updated_at DESC, id DESC",
            Item::COLUMNS
          ))?;
          let rows = stmt.query_map([], Item::from_row)?;
          rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;
        Ok(items)
      })
      .await
  }

  /// Merge `patch` into item `id` and bump its `updated_at`.
  ///
  /// The read and the write share one immediate transaction, so no other
  /// writer can slip in between them. `updated_at` always moves forward, even
  /// when two updates land in the same millisecond.
  pub async fn update(&self, id: i64, patch: ItemPatch) -> Result<Item> {
    self
      .with_connection(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut item = tx
          .query_row(
            &format!("SELECT {} FROM items WHERE id = ?1", Item::COLUMNS),
            params![id],
            Item::from_row,
          )
          .optional()?
          .ok_or(StoreError::NotFound(id))?;

        patch.apply(&mut item);
        item.updated_at = now_millis().max(item.updated_at + 1);

        tx.execute(
          "UPDATE items SET title = ?1, details = ?2, updated_at = ?3 WHERE id = ?4",
          params![item.title, item.details, item.updated_at, item.id],
        )?;
        tx.commit()?;

        tracing::debug!(id, "Updated item");
        Ok(item)
      })
      .await
  }

  /// Remove item `id`. Deleting an absent id is not an error.
  pub async fn delete(&self, id: i64) -> Result<()> {
    self
      .with_connection(move |conn| {
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.commit()?;

        tracing::debug!(id, removed, "Deleted item");
        Ok(())
      })
      .await
  }
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}
