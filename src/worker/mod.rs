//! The offline cache worker: request classification, lifecycle and the
//! manager that ties them to the cache.

mod classify;
mod lifecycle;
mod manager;

pub use lifecycle::WorkerState;
pub use manager::OfflineCacheManager;
