//! Offline cache router for application requests.
//!
//! This module answers outgoing requests from versioned cache generations or
//! the network:
//! - Navigations are served the cached application shell
//! - Same-origin GETs are cache-first and populate the cache on a miss
//! - Cross-origin requests and writes pass straight through
//! - Generations are installed from a precache list and activated by
//!   evicting every other generation

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod request;
mod router;
mod storage;
mod traits;

pub use http::HttpNetwork;
pub use request::{Request, RequestMode, Snapshot};
pub use router::{CacheRouter, RouterConfig};
pub use storage::{CacheStorage, GenerationInfo, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Network};
