//! Cache layer: one opened cache generation plus the request strategies that
//! read and refresh it.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedResponse, RequestKey};
use crate::net::{Request, Response};

/// Which live responses a network-first strategy copies into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePolicy {
  /// Store whatever the network returned
  Any,
  /// Store only responses with status exactly 200
  StatusOk,
}

impl StorePolicy {
  fn admits(self, response: &Response) -> bool {
    match self {
      Self::Any => true,
      Self::StatusOk => response.status == 200,
    }
  }
}

/// A handle on a single cache generation.
///
/// Cache refreshes made while serving a request are detached: the response
/// goes back to the caller while the write runs on the blocking pool.
/// Outstanding writes can be awaited with [`CacheLayer::settle`].
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  generation: Arc<str>,
  pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Open (create-if-absent) `generation` in `storage`.
  pub fn open(storage: Arc<S>, generation: &str) -> Result<Self> {
    storage.open(generation)?;
    Ok(Self {
      storage,
      generation: Arc::from(generation),
      pending: Arc::new(Mutex::new(Vec::new())),
    })
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Look up the stored response for `request`.
  pub fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self
      .storage
      .get(&self.generation, &RequestKey::from_request(request))
  }

  /// Store `response` for `request` and wait for the write to finish.
  pub async fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let storage = Arc::clone(&self.storage);
    let generation = Arc::clone(&self.generation);
    let key = RequestKey::from_request(request);
    let response = response.clone();

    tokio::task::spawn_blocking(move || storage.put(&generation, &key, &response))
      .await
      .map_err(|e| eyre!("Cache write task failed: {}", e))?
  }

  /// Store a copy of `response` in the background.
  ///
  /// Failures are logged, never reported to the caller.
  pub fn put_detached(&self, request: &Request, response: &Response) {
    let storage = Arc::clone(&self.storage);
    let generation = Arc::clone(&self.generation);
    let key = RequestKey::from_request(request);
    let copy = response.clone();

    let handle = tokio::task::spawn_blocking(move || {
      match storage.put(&generation, &key, &copy) {
        Ok(()) => debug!(key = %key.description(), "cache updated"),
        Err(e) => warn!(key = %key.description(), error = %e, "background cache write failed"),
      }
    });

    match self.pending.lock() {
      Ok(mut pending) => {
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
      }
      // Tracking is lost but the write itself still runs
      Err(e) => warn!("pending write list poisoned: {}", e),
    }
  }

  /// Wait for every background write started so far.
  pub async fn settle(&self) {
    let handles = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(e) => {
        warn!("pending write list poisoned: {}", e);
        return;
      }
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!("background cache write panicked: {}", e);
      }
    }
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch from network; on success copy the response into the cache
  ///    (subject to `policy`) and return it
  /// 2. On network failure, return the cached copy of the request
  /// 3. Failing that, return the cached `fallback` document if one is given
  /// 4. Otherwise fail with the network error
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    policy: StorePolicy,
    fallback: Option<&Request>,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let error = match fetcher().await {
      Ok(response) => {
        if policy.admits(&response) {
          self.put_detached(request, &response);
        } else {
          debug!(url = %request.url, status = response.status, "response not cached");
        }
        return Ok(CacheResult::from_network(response));
      }
      Err(e) => e,
    };

    debug!(url = %request.url, error = %error, "network failed, trying cache");

    if let Some(cached) = self.lookup(request)? {
      return Ok(CacheResult::offline(cached.response, cached.cached_at));
    }

    if let Some(fallback) = fallback {
      if let Some(cached) = self.lookup(fallback)? {
        return Ok(CacheResult::fallback(cached.response, cached.cached_at));
      }
    }

    Err(error.wrap_err(format!("No cached response for {}", request.url)))
  }

  /// Cache-first strategy.
  ///
  /// 1. Return the cached copy if present, without touching the network
  /// 2. Otherwise fetch, store a copy in the background and return the live
  ///    response; a network failure propagates
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.lookup(request)? {
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = fetcher().await?;
    self.put_detached(request, &response);
    Ok(CacheResult::from_network(response))
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: Arc::clone(&self.generation),
      pending: Arc::clone(&self.pending),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use crate::cache::SqliteStorage;
  use url::Url;

  fn layer() -> CacheLayer<SqliteStorage> {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    CacheLayer::open(storage, "test-v1").unwrap()
  }

  fn ok(url: &str, status: u16, body: &str) -> Result<Response> {
    Ok(Response::new(status, Url::parse(url).unwrap(), body.to_string()))
  }

  fn unreachable_net() -> Result<Response> {
    Err(eyre!("connection refused"))
  }

  #[tokio::test]
  async fn test_network_first_stores_live_response() {
    let layer = layer();
    let req = Request::parse("http://localhost:8000/items/").unwrap();

    let result = layer
      .network_first(&req, StorePolicy::Any, None, || async {
        ok("http://localhost:8000/items/", 200, "items")
      })
      .await
      .unwrap();
    layer.settle().await;

    assert_eq!(result.source, CacheSource::Network);
    let cached = layer.lookup(&req).unwrap().unwrap();
    assert_eq!(cached.response, result.data);
  }

  #[tokio::test]
  async fn test_network_first_status_policy_skips_non_200() {
    let layer = layer();
    let req = Request::parse("http://localhost:8000/api/missing").unwrap();

    let result = layer
      .network_first(&req, StorePolicy::StatusOk, None, || async {
        ok("http://localhost:8000/api/missing", 404, "nope")
      })
      .await
      .unwrap();
    layer.settle().await;

    assert_eq!(result.data.status, 404);
    assert!(layer.lookup(&req).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_document() {
    let layer = layer();
    let offline = Request::parse("http://localhost:8000/offline/").unwrap();
    layer
      .put(&offline, &ok("http://localhost:8000/offline/", 200, "offline").unwrap())
      .await
      .unwrap();

    let req = Request::parse("http://localhost:8000/never-seen/").unwrap();
    let result = layer
      .network_first(&req, StorePolicy::Any, Some(&offline), || async {
        unreachable_net()
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(&result.data.body[..], b"offline");
  }

  #[tokio::test]
  async fn test_network_first_without_fallback_fails() {
    let layer = layer();
    let req = Request::parse("http://localhost:8000/api/stock").unwrap();

    let result = layer
      .network_first(&req, StorePolicy::StatusOk, None, || async {
        unreachable_net()
      })
      .await;

    let err = result.unwrap_err();
    assert!(err
      .chain()
      .any(|cause| cause.to_string().contains("connection refused")));
  }

  #[tokio::test]
  async fn test_cache_first_miss_propagates_network_error() {
    let layer = layer();
    let req = Request::parse("https://cdn.jsdelivr.net/npm/chart.js").unwrap();

    let result = layer
      .cache_first(&req, || async { unreachable_net() })
      .await;
    layer.settle().await;

    assert!(result.is_err());
    assert!(layer.lookup(&req).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_detached_write_failure_is_swallowed() {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let layer = CacheLayer::open(Arc::clone(&storage), "doomed").unwrap();
    storage.delete_generation("doomed").unwrap();

    let req = Request::parse("http://localhost:8000/").unwrap();
    let result = layer
      .network_first(&req, StorePolicy::Any, None, || async {
        ok("http://localhost:8000/", 200, "home")
      })
      .await
      .unwrap();
    layer.settle().await;

    assert_eq!(result.source, CacheSource::Network);
    assert!(layer.lookup(&req).unwrap().is_none());
  }
}
