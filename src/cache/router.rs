//! Cache router that decides, per request, between cache and network.

use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::request::{Request, Snapshot};
use super::storage::{CacheStorage, StoredEntry};
use super::traits::{CacheError, CacheResult, Network, Result};

/// Static description of one cache generation.
#[derive(Debug, Clone)]
pub struct RouterConfig {
  /// Generation identifier; changing it triggers install + activate
  pub generation: String,
  /// Application origin, e.g. `http://localhost:8080/`
  pub origin: Url,
  /// Path of the entry served for navigations
  pub shell: String,
  /// Paths fetched and stored at install time
  pub precache: Vec<String>,
  /// Store non-2xx responses fetched on a cache miss
  pub cache_error_responses: bool,
}

/// Where the router's generation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Not installed by this router yet
  Pending,
  /// Precache stored, waiting for activation
  Installed,
  /// Older generations evicted; this generation is the only one
  Active,
}

/// Outcome of [`CacheRouter::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refresh {
  /// Number of precached entries, if an install ran
  pub installed: Option<usize>,
  /// Generations deleted on activation
  pub evicted: Vec<String>,
}

/// Intercepts requests and answers them from cache or network.
///
/// Policy, in order:
/// 1. Navigations get the cached shell, else go to the network
/// 2. Same-origin GETs are cache-first; misses are fetched and stored in
///    the active generation, if one is installed
/// 3. Everything else passes through uncached
pub struct CacheRouter<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  config: RouterConfig,
  origin: Origin,
  /// Serializes install and activate
  lifecycle: Mutex<Lifecycle>,
}

impl<S: CacheStorage + 'static, N: Network> CacheRouter<S, N> {
  pub fn new(storage: S, network: N, config: RouterConfig) -> Result<Self> {
    let origin = config.origin.origin();
    if !origin.is_tuple() {
      return Err(CacheError::InvalidRequest(format!(
        "origin {} has no host",
        config.origin
      )));
    }

    Ok(Self {
      storage: Arc::new(storage),
      network: Arc::new(network),
      config,
      origin,
      lifecycle: Mutex::new(Lifecycle::Pending),
    })
  }

  /// Identifier of this router's generation.
  pub fn generation(&self) -> &str {
    &self.config.generation
  }

  #[allow(dead_code)]
  pub async fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle.lock().await
  }

  /// Access to the underlying storage.
  #[allow(dead_code)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Resolve an application path against the origin.
  fn resolve(&self, path: &str) -> Result<Url> {
    self
      .config
      .origin
      .join(path)
      .map_err(|e| CacheError::InvalidRequest(format!("cannot resolve {}: {}", path, e)))
  }

  /// Run a storage call off the async runtime.
  async fn blocking<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || f(&storage)).await?
  }

  async fn lookup(&self, request: &Request) -> Result<Option<StoredEntry>> {
    let key = request.cache_hash();
    self.blocking(move |s| s.lookup(&key)).await
  }

  /// Populate this router's generation with every precache path.
  ///
  /// All paths are fetched before anything is written; one failed fetch
  /// fails the install and leaves storage untouched.
  pub async fn install(&self) -> Result<usize> {
    let mut state = self.lifecycle.lock().await;
    self.install_locked(&mut state).await
  }

  async fn install_locked(&self, state: &mut Lifecycle) -> Result<usize> {
    let generation = self.config.generation.clone();
    info!(%generation, paths = self.config.precache.len(), "Installing cache generation");

    let requests = self
      .config
      .precache
      .iter()
      .map(|path| self.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let network = Arc::clone(&self.network);
    let responses = try_join_all(requests.iter().map(|request| {
      let network = Arc::clone(&network);
      async move {
        let response = network.fetch(request).await?;
        if !response.is_success() {
          return Err(CacheError::Network(format!(
            "precache {} returned {}",
            request.url, response.status
          )));
        }
        Ok::<_, CacheError>((request.cache_hash(), response))
      }
    }))
    .await?;

    let count = responses.len();
    let target = generation.clone();
    self
      .blocking(move |s| s.put_all(&target, &responses))
      .await?;

    *state = Lifecycle::Installed;
    info!(%generation, entries = count, "Cache generation installed");
    Ok(count)
  }

  /// Evict every other generation and take over as the only one.
  ///
  /// Requires this generation to be installed, either by this router or by
  /// an earlier run against the same storage.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let mut state = self.lifecycle.lock().await;
    self.activate_locked(&mut state).await
  }

  async fn activate_locked(&self, state: &mut Lifecycle) -> Result<Vec<String>> {
    let generation = self.config.generation.clone();

    if *state == Lifecycle::Pending && !self.is_installed().await? {
      return Err(CacheError::NotInstalled(generation));
    }

    let keep = generation.clone();
    let evicted = self
      .blocking(move |s| {
        let mut evicted = Vec::new();
        for info in s.generations()? {
          if info.name != keep && s.delete_generation(&info.name)? {
            evicted.push(info.name);
          }
        }
        Ok(evicted)
      })
      .await?;

    *state = Lifecycle::Active;
    info!(%generation, evicted = evicted.len(), "Cache generation active");
    Ok(evicted)
  }

  async fn is_installed(&self) -> Result<bool> {
    let name = self.config.generation.clone();
    self.blocking(move |s| s.is_installed(&name)).await
  }

  /// Install the generation if storage lacks it, then activate.
  ///
  /// Holds the lifecycle lock throughout, so concurrent refreshes install
  /// at most once.
  pub async fn refresh(&self) -> Result<Refresh> {
    let mut state = self.lifecycle.lock().await;

    let installed = if self.is_installed().await? {
      None
    } else {
      Some(self.install_locked(&mut state).await?)
    };

    let evicted = self.activate_locked(&mut state).await?;
    Ok(Refresh { installed, evicted })
  }

  /// Answer one intercepted request.
  pub async fn handle(&self, request: &Request) -> Result<CacheResult<Snapshot>> {
    if request.is_navigation() {
      let shell = Request::get(self.resolve(&self.config.shell)?);
      if let Some(entry) = self.lookup(&shell).await? {
        debug!(url = %request.url, generation = %entry.generation, "Serving cached shell");
        return Ok(CacheResult::from_cache(
          entry.response,
          entry.generation,
          entry.cached_at,
        ));
      }

      debug!(url = %request.url, "Shell not cached, navigating over network");
      let response = self.network.fetch(request).await?;
      return Ok(CacheResult::from_network(response));
    }

    if request.is_read() && request.is_same_origin(&self.origin) {
      if let Some(entry) = self.lookup(request).await? {
        debug!(url = %request.url, generation = %entry.generation, "Cache hit");
        return Ok(CacheResult::from_cache(
          entry.response,
          entry.generation,
          entry.cached_at,
        ));
      }

      debug!(url = %request.url, "Cache miss");
      let response = self.network.fetch(request).await?;

      if self.config.cache_error_responses || response.is_success() {
        let key = request.cache_hash();
        let copy = response.clone();
        match self.blocking(move |s| s.put_active(&key, &copy)).await {
          Ok(Some(generation)) => debug!(url = %request.url, %generation, "Cached response"),
          Ok(None) => debug!(url = %request.url, "No active generation, response not cached"),
          Err(e) => warn!(url = %request.url, error = %e, "Failed to cache response"),
        }
      } else {
        debug!(url = %request.url, status = response.status, "Not caching error response");
      }

      return Ok(CacheResult::from_network(response));
    }

    debug!(method = %request.method, url = %request.url, "Passing through");
    let response = self.network.fetch(request).await?;
    Ok(CacheResult::passthrough(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::CacheSource;
  use crate::cache::RequestMode;
  use crate::cache::fake::FakeNetwork;
  use reqwest::Method;

  const ORIGIN: &str = "http://localhost:8080/";

  fn shell_network() -> Arc<FakeNetwork> {
    let network = Arc::new(FakeNetwork::default());
    network.serve("http://localhost:8080/", 200, "root");
    network.serve("http://localhost:8080/index.html", 200, "<html>v1</html>");
    network.serve("http://localhost:8080/app.js", 200, "app");
    network
  }

  fn config(generation: &str) -> RouterConfig {
    RouterConfig {
      generation: generation.to_string(),
      origin: Url::parse(ORIGIN).unwrap(),
      shell: "/index.html".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/app.js".to_string(),
      ],
      cache_error_responses: false,
    }
  }

  fn router(
    generation: &str,
    network: &Arc<FakeNetwork>,
  ) -> CacheRouter<SqliteStorage, Arc<FakeNetwork>> {
    let storage = SqliteStorage::open_in_memory().unwrap();
    CacheRouter::new(storage, Arc::clone(network), config(generation)).unwrap()
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_precached_entry_served_without_network() {
    let network = shell_network();
    let router = router("v1", &network);

    assert_eq!(router.install().await.unwrap(), 3);
    router.activate().await.unwrap();
    let before = network.calls();

    let result = router.handle(&Request::get(url("/app.js"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.generation.as_deref(), Some("v1"));
    assert_eq!(result.data.body, b"app");
    assert_eq!(network.calls(), before);
  }

  #[tokio::test]
  async fn test_miss_is_fetched_then_cached() {
    let network = shell_network();
    network.serve("http://localhost:8080/data.json", 200, "[1]");
    let router = router("v1", &network);
    router.refresh().await.unwrap();

    let first = router.handle(&Request::get(url("/data.json"))).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);

    // Later network changes are not seen: the snapshot is served as-is.
    network.serve("http://localhost:8080/data.json", 200, "[1,2]");
    let second = router.handle(&Request::get(url("/data.json"))).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.body, b"[1]");
    assert_eq!(second.generation.as_deref(), Some("v1"));
  }

  #[tokio::test]
  async fn test_miss_before_install_leaves_generation_uninstalled() {
    let network = shell_network();
    let router = router("v1", &network);

    let miss = router.handle(&Request::get(url("/app.js"))).await.unwrap();
    assert_eq!(miss.source, CacheSource::Network);
    assert!(router.storage().generations().unwrap().is_empty());
    assert!(matches!(
      router.activate().await,
      Err(CacheError::NotInstalled(_))
    ));

    let refresh = router.refresh().await.unwrap();
    assert_eq!(refresh.installed, Some(3));

    network.set_offline(true);
    let shell = router.handle(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(shell.source, CacheSource::Cache);
    assert_eq!(shell.data.body, b"<html>v1</html>");
  }

  #[tokio::test]
  async fn test_miss_after_version_bump_goes_to_active_generation() {
    let network = shell_network();
    network.serve("http://localhost:8080/data.json", 200, "[1]");

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let v1 = CacheRouter::new(Arc::clone(&storage), Arc::clone(&network), config("v1")).unwrap();
    v1.refresh().await.unwrap();

    let v2 = CacheRouter::new(Arc::clone(&storage), Arc::clone(&network), config("v2")).unwrap();
    v2.handle(&Request::get(url("/data.json"))).await.unwrap();

    let names: Vec<_> = storage
      .generations()
      .unwrap()
      .into_iter()
      .map(|g| (g.name, g.entries))
      .collect();
    assert_eq!(names, vec![("v1".to_string(), 4)]);

    network.serve("http://localhost:8080/index.html", 200, "<html>v2</html>");
    let refresh = v2.refresh().await.unwrap();
    assert_eq!(refresh.installed, Some(3));
    assert_eq!(refresh.evicted, vec!["v1".to_string()]);

    network.set_offline(true);
    let shell = v2.handle(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(shell.data.body, b"<html>v2</html>");
    assert_eq!(shell.generation.as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_concurrent_refreshes_install_once() {
    let network = shell_network();
    let router = router("v1", &network);

    let (a, b) = tokio::join!(router.refresh(), router.refresh());
    let installs: Vec<_> = [a.unwrap(), b.unwrap()]
      .into_iter()
      .filter_map(|r| r.installed)
      .collect();

    assert_eq!(installs, vec![3]);
    assert_eq!(network.calls(), 3);
  }

  #[tokio::test]
  async fn test_error_status_not_cached_by_default() {
    let network = shell_network();
    let router = router("v1", &network);
    router.refresh().await.unwrap();

    let first = router.handle(&Request::get(url("/missing"))).await.unwrap();
    assert_eq!(first.data.status, 404);

    let second = router.handle(&Request::get(url("/missing"))).await.unwrap();
    assert_eq!(second.source, CacheSource::Network);
    assert_eq!(router.storage().generations().unwrap()[0].entries, 3);
  }

  #[tokio::test]
  async fn test_error_status_cached_when_enabled() {
    let network = shell_network();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let router = CacheRouter::new(
      storage,
      Arc::clone(&network),
      RouterConfig {
        cache_error_responses: true,
        ..config("v1")
      },
    )
    .unwrap();
    router.refresh().await.unwrap();

    router.handle(&Request::get(url("/missing"))).await.unwrap();
    let second = router.handle(&Request::get(url("/missing"))).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.status, 404);
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_shell() {
    let network = shell_network();
    let router = router("v1", &network);
    router.refresh().await.unwrap();

    network.set_offline(true);
    let result = router
      .handle(&Request::navigate(url("/some/deep/link")))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"<html>v1</html>");
  }

  #[tokio::test]
  async fn test_navigation_without_shell_uses_network() {
    let network = shell_network();
    let router = router("v1", &network);

    let result = router.handle(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"root");

    network.set_offline(true);
    let err = router.handle(&Request::navigate(url("/"))).await.unwrap_err();
    assert!(matches!(err, CacheError::Network(_)));
  }

  #[tokio::test]
  async fn test_offline_miss_propagates_fault() {
    let network = shell_network();
    let router = router("v1", &network);
    network.set_offline(true);

    let err = router
      .handle(&Request::get(url("/app.js")))
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::Network(_)));
  }

  #[tokio::test]
  async fn test_cross_origin_and_writes_pass_through() {
    let network = shell_network();
    network.serve("https://cdn.example.com/lib.js", 200, "lib");
    let router = router("v1", &network);

    let cross = Request::get(Url::parse("https://cdn.example.com/lib.js").unwrap());
    assert_eq!(
      router.handle(&cross).await.unwrap().source,
      CacheSource::Passthrough
    );
    assert_eq!(
      router.handle(&cross).await.unwrap().source,
      CacheSource::Passthrough
    );

    let post = Request::new(Method::POST, url("/app.js"), RequestMode::Subresource);
    assert_eq!(
      router.handle(&post).await.unwrap().source,
      CacheSource::Passthrough
    );

    assert!(router.storage().generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_fails_on_any_precache_failure() {
    let network = shell_network();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut cfg = config("v1");
    cfg.precache.push("/absent.css".to_string());
    let router = CacheRouter::new(storage, Arc::clone(&network), cfg).unwrap();

    let err = router.install().await.unwrap_err();
    assert!(matches!(err, CacheError::Network(_)));
    assert!(router.storage().generations().unwrap().is_empty());
    assert_eq!(router.lifecycle().await, Lifecycle::Pending);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let network = shell_network();
    let router = router("v1", &network);

    let err = router.activate().await.unwrap_err();
    assert!(matches!(err, CacheError::NotInstalled(_)));
  }

  #[tokio::test]
  async fn test_generation_rotation_evicts_old_entries() {
    let network = shell_network();
    network.serve("http://localhost:8080/extra.css", 200, "old css");

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let v1 = CacheRouter::new(Arc::clone(&storage), Arc::clone(&network), config("v1")).unwrap();
    v1.refresh().await.unwrap();
    v1.handle(&Request::get(url("/extra.css"))).await.unwrap();

    network.serve("http://localhost:8080/index.html", 200, "<html>v2</html>");
    network.serve("http://localhost:8080/extra.css", 200, "new css");

    let v2 = CacheRouter::new(Arc::clone(&storage), Arc::clone(&network), config("v2")).unwrap();
    v2.install().await.unwrap();

    // Until activation the previous generation keeps serving.
    network.set_offline(true);
    let during = v2.handle(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(during.data.body, b"<html>v1</html>");
    let extra = v2.handle(&Request::get(url("/extra.css"))).await.unwrap();
    assert_eq!(extra.generation.as_deref(), Some("v1"));

    assert_eq!(v2.activate().await.unwrap(), vec!["v1".to_string()]);
    assert_eq!(v2.lifecycle().await, Lifecycle::Active);

    let after = v2.handle(&Request::navigate(url("/"))).await.unwrap();
    assert_eq!(after.data.body, b"<html>v2</html>");
    assert_eq!(after.generation.as_deref(), Some("v2"));

    // Only cached under v1: now requires the network.
    let err = v2.handle(&Request::get(url("/extra.css"))).await.unwrap_err();
    assert!(matches!(err, CacheError::Network(_)));

    network.set_offline(false);
    let refetched = v2.handle(&Request::get(url("/extra.css"))).await.unwrap();
    assert_eq!(refetched.source, CacheSource::Network);
    assert_eq!(refetched.data.body, b"new css");
  }

  #[tokio::test]
  async fn test_refresh_skips_install_when_present() {
    let network = shell_network();
    let router = router("v1", &network);

    let first = router.refresh().await.unwrap();
    assert_eq!(first.installed, Some(3));
    assert!(first.evicted.is_empty());

    let calls = network.calls();
    let second = router.refresh().await.unwrap();
    assert_eq!(second.installed, None);
    assert_eq!(network.calls(), calls);
  }

  #[test]
  fn test_origin_without_host_rejected() {
    let network = shell_network();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cfg = RouterConfig {
      origin: Url::parse("data:text/plain,hello").unwrap(),
      ..config("v1")
    };

    assert!(matches!(
      CacheRouter::new(storage, network, cfg),
      Err(CacheError::InvalidRequest(_))
    ));
  }
}
