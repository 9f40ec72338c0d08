//! Request and response shapes seen by the router.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::{Origin, Url};

/// How a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// The user navigating to a page
  Navigate,
  /// Any other fetch (scripts, styles, data)
  Subresource,
}

/// An outgoing request intercepted by the router.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
    Self { method, url, mode }
  }

  /// Sub-resource GET.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::Subresource)
  }

  /// Page navigation.
  pub fn navigate(url: Url) -> Self {
    Self::new(Method::GET, url, RequestMode::Navigate)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Only GET is treated as a side-effect free read.
  pub fn is_read(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_same_origin(&self, origin: &Origin) -> bool {
    self.url.origin() == *origin
  }

  /// Lookup key: the URL without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  /// SHA256 of the cache key, used as the stored row key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.cache_key().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Point-in-time copy of a response: status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Snapshot {
  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header named `name` (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
