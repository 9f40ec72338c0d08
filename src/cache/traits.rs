//! Core traits and types for the cache router.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::request::{Request, Snapshot};

/// Failures surfaced by the cache router.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The transport failed before a response arrived
  #[error("network error: {0}")]
  Network(String),

  /// Cache storage could not be read or written
  #[error("cache storage error: {0}")]
  Storage(String),

  /// Activation was requested for a generation that was never installed
  #[error("cache generation {0} is not installed")]
  NotInstalled(String),

  /// A URL or path could not be resolved against the application origin
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    CacheError::Storage(e.to_string())
  }
}

impl From<tokio::task::JoinError> for CacheError {
  fn from(e: tokio::task::JoinError) -> Self {
    CacheError::Storage(format!("cache task failed: {}", e))
  }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Transport used when a request cannot be answered from cache.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Snapshot>;
}

#[async_trait]
impl<N: Network + ?Sized> Network for std::sync::Arc<N> {
  async fn fetch(&self, request: &Request) -> Result<Snapshot> {
    (**self).fetch(request).await
  }
}

/// Result from a routed request, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Generation that answered (if from cache)
  pub generation: Option<String>,
}

impl<T> CacheResult<T> {
  /// Fetched over the network by a managed policy.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      generation: None,
    }
  }

  /// Served from a cache generation.
  pub fn from_cache(data: T, generation: String, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
      generation: Some(generation),
    }
  }

  /// Forwarded untouched.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
      generation: None,
    }
  }
}

/// Indicates where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from network under a caching policy
  Network,
  /// Answered from a cache generation without touching the network
  Cache,
  /// Cross-origin or non-GET request, forwarded uncached
  Passthrough,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      CacheSource::Network => "network",
      CacheSource::Cache => "cache",
      CacheSource::Passthrough => "passthrough",
    };
    f.write_str(label)
  }
}
