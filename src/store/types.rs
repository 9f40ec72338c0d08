use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A persisted list item.
///
/// Values returned by the store are copies; they do not follow later writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
  pub id: i64,
  pub title: String,
  pub details: String,
  /// Milliseconds since the Unix epoch, fixed at creation
  pub created_at: i64,
  /// Milliseconds since the Unix epoch, bumped on every update
  pub updated_at: i64,
}

impl Item {
  pub(super) const COLUMNS: &'static str = "id, title, details, created_at, updated_at";

  pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      title: row.get(1)?,
      details: row.get(2)?,
      created_at: row.get(3)?,
      updated_at: row.get(4)?,
    })
  }
}

/// Fields supplied when creating an item. Missing details default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub details: Option<String>,
}

impl NewItem {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      details: None,
    }
  }

  pub fn with_details(mut self, details: impl Into<String>) -> Self {
    self.details = Some(details.into());
    self
  }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub details: Option<String>,
}

impl ItemPatch {
  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  pub fn details(mut self, details: impl Into<String>) -> Self {
    self.details = Some(details.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.title.is_none() && self.details.is_none()
  }

  /// Merge the supplied fields over `item`. Timestamps are left to the caller.
  pub fn apply(self, item: &mut Item) {
    if let Some(title) = self.title {
      item.title = title;
    }
    if let Some(details) = self.details {
      item.details = details;
    }
  }
}
