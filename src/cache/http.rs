//! Network transport backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use std::time::Duration;

use super::request::{Request, Snapshot};
use super::traits::{CacheError, Network, Result};

/// HTTP transport for requests the cache cannot answer.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("offlist/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| CacheError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Snapshot> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    if request.is_navigation() {
      builder = builder.header(ACCEPT, HeaderValue::from_static("text/html"));
    }

    let response = builder
      .send()
      .await
      .map_err(|e| CacheError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

    let url = response.url().to_string();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::Network(format!("failed to read body of {}: {}", url, e)))?
      .to_vec();

    tracing::debug!(%url, status, bytes = body.len(), "Fetched");
    Ok(Snapshot {
      url,
      status,
      headers,
      body,
    })
  }
}
