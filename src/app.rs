use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheRouter, HttpNetwork, Network, Request, RequestMode, SqliteStorage};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::store::{ItemPatch, ItemStore, NewItem, SCHEMA_VERSION};

const CACHE_FILE: &str = "cache.db";

/// Application wiring: turns commands into store and router calls.
pub struct App {
  config: Config,
  data_dir: PathBuf,
  /// Transport for requests the cache cannot answer
  network: Arc<dyn Network>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let network = HttpNetwork::new(config.cache.timeout())?;
    Self::with_network(config, Arc::new(network))
  }

  pub fn with_network(config: Config, network: Arc<dyn Network>) -> Result<Self> {
    let data_dir = config.data_dir()?;
    Ok(Self {
      config,
      data_dir,
      network,
    })
  }

  fn store(&self) -> Result<ItemStore> {
    let store = ItemStore::open_in(&self.data_dir, &self.config.store.name)?;
    tracing::debug!(
      store = store.name(),
      schema = SCHEMA_VERSION,
      path = %store.path().display(),
      "Using item store"
    );
    Ok(store)
  }

  fn router(&self) -> Result<CacheRouter<SqliteStorage, Arc<dyn Network>>> {
    let storage = SqliteStorage::open(&self.data_dir.join(CACHE_FILE))?;
    Ok(CacheRouter::new(
      storage,
      Arc::clone(&self.network),
      self.config.cache.router_config()?,
    )?)
  }

  /// Absolute URLs are used as-is; anything else is a path on the origin.
  fn resolve_url(&self, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
      return Ok(url);
    }

    let origin = self.config.cache.router_config()?.origin;
    origin
      .join(target)
      .map_err(|e| eyre!("Cannot resolve '{}' against {}: {}", target, origin, e))
  }

  pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
      Command::Add { title, details } => {
        let mut new = NewItem::new(commands::clean_title(&title)?);
        if let Some(details) = details {
          new = new.with_details(details.trim());
        }

        let item = self.store()?.add(new).await?;
        writeln!(out, "{}", commands::format_item(&item))?;
      }

      Command::List { json } => {
        let items = self.store()?.get_all().await?;
        if json {
          serde_json::to_writer_pretty(&mut *out, &items)?;
          writeln!(out)?;
        } else if items.is_empty() {
          writeln!(out, "No items")?;
        } else {
          for item in &items {
            writeln!(out, "{}", commands::format_item(item))?;
          }
        }
      }

      Command::Edit { id, title, details } => {
        let mut patch = ItemPatch::default();
        if let Some(title) = title {
          patch = patch.title(commands::clean_title(&title)?);
        }
        if let Some(details) = details {
          patch = patch.details(details.trim());
        }
        if patch.is_empty() {
          return Err(eyre!("Nothing to change: pass --title and/or --details"));
        }

        let item = self.store()?.update(id, patch).await?;
        writeln!(out, "{}", commands::format_item(&item))?;
      }

      Command::Rm { id } => {
        self.store()?.delete(id).await?;
      }

      Command::Fetch {
        url,
        navigate,
        method,
        out: body_path,
      } => {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
        let mode = if navigate {
          RequestMode::Navigate
        } else {
          RequestMode::Subresource
        };
        let request = Request::new(method, self.resolve_url(&url)?, mode);

        let result = self.router()?.handle(&request).await?;
        writeln!(out, "{}", commands::format_fetch(&result))?;

        match body_path {
          Some(path) => std::fs::write(&path, &result.data.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
          None => writeln!(out, "{}", String::from_utf8_lossy(&result.data.body))?,
        }
      }

      Command::Refresh => {
        let router = self.router()?;
        let refresh = router.refresh().await?;

        match refresh.installed {
          Some(count) => writeln!(
            out,
            "Installed {} ({} entries)",
            router.generation(),
            count
          )?,
          None => writeln!(out, "{} already installed", router.generation())?,
        }
        for name in &refresh.evicted {
          writeln!(out, "Evicted {}", name)?;
        }
      }

      Command::Generations => {
        let storage = SqliteStorage::open(&self.data_dir.join(CACHE_FILE))?;
        let generations = tokio::task::spawn_blocking(move || {
          use crate::cache::CacheStorage;
          storage.generations()
        })
        .await??;

        if generations.is_empty() {
          writeln!(out, "No cache generations")?;
        }
        for info in &generations {
          writeln!(
            out,
            "{}",
            commands::format_generation(info, &self.config.cache.version)
          )?;
        }
      }
    }

    Ok(())
  }
}
