//! Subcommands and output formatting

use chrono::{DateTime, Local};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use crate::cache::{CacheResult, GenerationInfo, Snapshot};
use crate::store::Item;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
  /// Add an item
  #[command(alias = "a")]
  Add {
    title: String,
    #[arg(short, long)]
    details: Option<String>,
  },
  /// List items, most recently updated first
  #[command(alias = "ls")]
  List {
    /// Print records as JSON
    #[arg(long)]
    json: bool,
  },
  /// Change the title and/or details of an item
  #[command(alias = "e")]
  Edit {
    id: i64,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    details: Option<String>,
  },
  /// Delete an item (missing ids are ignored)
  #[command(aliases = ["delete", "del"])]
  Rm { id: i64 },
  /// Request a URL or application path through the cache router
  Fetch {
    /// Absolute URL, or a path resolved against the configured origin
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the response body to a file instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,
  },
  /// Install the configured cache generation if needed and activate it
  Refresh,
  /// List stored cache generations
  #[command(alias = "gens")]
  Generations,
}

/// Trim a title and reject it if nothing is left.
pub fn clean_title(title: &str) -> Result<String> {
  let title = title.trim();
  if title.is_empty() {
    return Err(eyre!("Title cannot be empty"));
  }
  Ok(title.to_string())
}

/// Format a millisecond timestamp in local time.
pub fn format_millis(millis: i64) -> String {
  DateTime::from_timestamp_millis(millis)
    .map(|dt| {
      dt.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
    })
    .unwrap_or_else(|| millis.to_string())
}

/// One line per item: id, title, details, last update.
pub fn format_item(item: &Item) -> String {
  let mut line = format!("{:>4}  {}", item.id, item.title);
  if !item.details.is_empty() {
    line.push_str(" - ");
    line.push_str(&item.details);
  }
  line.push_str(&format!("  ({})", format_millis(item.updated_at)));
  line
}

pub fn format_generation(info: &GenerationInfo, current: &str) -> String {
  let marker = if info.name == current { "*" } else { " " };
  format!(
    "{} {}  {} entries  created {}",
    marker,
    info.name,
    info.entries,
    info.created_at.format("%Y-%m-%d %H:%M:%S")
  )
}

/// Status line for a routed response.
pub fn format_fetch(result: &CacheResult<Snapshot>) -> String {
  let mut line = format!(
    "{} {} [{}]",
    result.data.status, result.data.url, result.source
  );
  if let Some(content_type) = result.data.header("content-type") {
    line.push_str(&format!(" {}", content_type));
  }
  if let Some(generation) = &result.generation {
    line.push_str(&format!(" from {}", generation));
  }
  line
}
