//! Generational response cache for offline support.
//!
//! This module provides:
//! - Named cache generations in a SQLite store, swept wholesale when superseded
//! - Request identity (`RequestKey`) for stored responses
//! - Network-first and cache-first strategies with detached cache refreshes

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, StorePolicy};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, RequestKey};

#[cfg(test)]
pub use traits::{CacheSource, CachedResponse};
