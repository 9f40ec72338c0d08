use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::RouterConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Directory holding the item store and cache databases
  pub data_dir: Option<PathBuf>,
  pub store: StoreConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Named store identifier; the database file is `<name>.db`
  pub name: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      name: "offlist-db".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation identifier; bump it to rotate the cache
  pub version: String,
  /// Application origin used for same-origin checks and precache URLs
  pub origin: String,
  /// Application shell entry served for navigations
  pub shell: String,
  /// Application shell paths stored at install time
  pub precache: Vec<String>,
  /// Also cache non-2xx responses fetched on a miss
  pub cache_error_responses: bool,
  /// Transport timeout for network fetches
  pub timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "offlist-cache-v2".to_string(),
      origin: "http://localhost:8080".to_string(),
      shell: "/index.html".to_string(),
      precache: [
        "/",
        "/index.html",
        "/styles.css",
        "/app.js",
        "/db.js",
        "/manifest.webmanifest",
      ]
      .iter()
      .map(|p| p.to_string())
      .collect(),
      cache_error_responses: false,
      timeout_secs: 30,
    }
  }
}

impl CacheConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// Router settings derived from this section.
  pub fn router_config(&self) -> Result<RouterConfig> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid cache origin '{}': {}", self.origin, e))?;

    Ok(RouterConfig {
      generation: self.version.clone(),
      origin,
      shell: self.shell.clone(),
      precache: self.precache.clone(),
      cache_error_responses: self.cache_error_responses,
    })
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offlist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offlist/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offlist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offlist").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offlist"))
  }
}
