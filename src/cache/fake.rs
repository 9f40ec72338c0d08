//! In-memory network for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::request::{Request, Snapshot};
use super::traits::{CacheError, Network, Result};

/// Serves canned pages by URL, with a switchable connection.
#[derive(Default)]
pub struct FakeNetwork {
  pages: Mutex<HashMap<String, (u16, String)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn serve(&self, url: &str, status: u16, body: &str) {
    self
      .pages
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.to_string()));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of fetches attempted, including offline ones.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Snapshot> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.offline.load(Ordering::SeqCst) {
      return Err(CacheError::Network("offline".to_string()));
    }

    let (status, body) = self
      .pages
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or((404, "not found".to_string()));

    Ok(Snapshot {
      url: request.url.to_string(),
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.into_bytes(),
    })
  }
}
