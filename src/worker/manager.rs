//! The offline cache manager: install, activate and per-request routing.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::classify::{classify, RequestClass};
use super::lifecycle::{Lifecycle, WorkerState};
use crate::cache::{CacheLayer, CacheResult, CacheStorage, RequestKey, StorePolicy};
use crate::config::ManagerConfig;
use crate::net::{Fetcher, Request, Response};

/// Outcome of the install phase.
#[derive(Debug, Default)]
pub struct InstallReport {
  /// Precache entries now stored
  pub cached: Vec<Url>,
  /// Entries that were skipped, with the reason
  pub failed: Vec<(Url, String)>,
}

/// Outcome of the activate phase.
#[derive(Debug, Default)]
pub struct SweepReport {
  /// Stale generations removed
  pub deleted: Vec<String>,
  /// Stale generations that could not be removed, with the reason
  pub failed: Vec<(String, String)>,
}

/// Manages one cache generation on behalf of a host runtime.
///
/// The host calls [`initialize`](Self::initialize) once, then
/// [`activate_and_sweep`](Self::activate_and_sweep) once, then
/// [`handle_request`](Self::handle_request) for every intercepted request.
/// Requests may be handled concurrently.
pub struct OfflineCacheManager<S: CacheStorage, F: Fetcher> {
  config: ManagerConfig,
  storage: Arc<S>,
  fetcher: Arc<F>,
  cache: CacheLayer<S>,
  lifecycle: Lifecycle,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Create a manager and open (create-if-absent) its cache generation.
  pub fn new(config: ManagerConfig, storage: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    let cache = CacheLayer::open(Arc::clone(&storage), &config.generation)?;

    Ok(Self {
      config,
      storage,
      fetcher,
      cache,
      lifecycle: Lifecycle::new(),
    })
  }

  /// Resume a worker the host already moved to `state`.
  pub fn with_state(mut self, state: WorkerState) -> Self {
    self.lifecycle = Lifecycle::resume(state);
    self
  }

  pub fn generation(&self) -> &str {
    self.cache.generation()
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  /// Install phase: fetch every precache entry into the current generation.
  ///
  /// Entries are fetched concurrently. A failed fetch or a non-2xx status
  /// skips that entry only; install still succeeds. Finishes by asking the
  /// host to skip waiting.
  pub async fn initialize(&self) -> Result<InstallReport> {
    self.lifecycle.transition(WorkerState::Installing)?;

    if let Err(e) = self.storage.open(self.generation()) {
      self.lifecycle.transition(WorkerState::Redundant)?;
      return Err(e);
    }

    let results = join_all(self.config.precache.iter().map(|url| async move {
      let result = self.precache_one(url).await;
      (url.clone(), result)
    }))
    .await;

    let mut report = InstallReport::default();
    for (url, result) in results {
      match result {
        Ok(()) => {
          debug!(url = %url, "precached");
          report.cached.push(url);
        }
        Err(e) => {
          warn!(url = %url, error = %e, "failed to precache asset");
          report.failed.push((url, e.to_string()));
        }
      }
    }

    self.lifecycle.transition(WorkerState::Installed)?;
    self.lifecycle.skip_waiting();

    info!(
      generation = self.generation(),
      cached = report.cached.len(),
      failed = report.failed.len(),
      "install complete"
    );

    Ok(report)
  }

  async fn precache_one(&self, url: &Url) -> Result<()> {
    let request = Request::get(url.clone());
    let response = self.fetcher.fetch(&request).await?;
    if !response.ok() {
      return Err(eyre!("Unexpected status {} for {}", response.status, url));
    }
    self.cache.put(&request, &response).await
  }

  /// Activate phase: delete every generation other than the current one,
  /// then claim open clients.
  ///
  /// Deletions run concurrently; one failing does not stop the others.
  pub async fn activate_and_sweep(&self) -> Result<SweepReport> {
    self.lifecycle.transition(WorkerState::Activating)?;

    let names = match self.storage.generations() {
      Ok(names) => names,
      Err(e) => {
        self.lifecycle.transition(WorkerState::Redundant)?;
        return Err(e);
      }
    };

    let deletions: Vec<_> = names
      .into_iter()
      .filter(|name| name != self.generation())
      .map(|name| {
        let storage = Arc::clone(&self.storage);
        let target = name.clone();
        let handle = tokio::task::spawn_blocking(move || storage.delete_generation(&target));
        (name, handle)
      })
      .collect();

    let mut report = SweepReport::default();
    for (name, handle) in deletions {
      let result = handle
        .await
        .map_err(|e| eyre!("Delete task failed: {}", e))
        .and_then(|deleted| deleted);

      match result {
        Ok(_) => {
          debug!(generation = %name, "deleted stale cache generation");
          report.deleted.push(name);
        }
        Err(e) => {
          warn!(generation = %name, error = %e, "failed to delete stale cache generation");
          report.failed.push((name, e.to_string()));
        }
      }
    }

    self.lifecycle.transition(WorkerState::Activated)?;
    self.lifecycle.claim_clients()?;

    info!(
      generation = self.generation(),
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "activation complete"
    );

    Ok(report)
  }

  /// Serve an intercepted request with the strategy for its class.
  ///
  /// - Navigation: network-first, storing any live response; on network
  ///   failure the cached copy, then the cached offline document
  /// - CDN asset: cache-first; a network failure on a miss propagates
  /// - Anything else: network-first, storing only status 200; on network
  ///   failure the cached copy, with no further fallback
  ///
  /// Cache refreshes happen in the background and do not delay the response.
  /// The host only routes requests to an activated worker; serving in an
  /// earlier state is allowed and logged.
  pub async fn handle_request(&self, request: &Request) -> Result<CacheResult<Response>> {
    let state = self.lifecycle.state();
    if state != WorkerState::Activated {
      debug!(state = %state, url = %request.url, "serving before activation");
    }

    let class = classify(request, &self.config.cdn_hosts);
    debug!(
      key = %RequestKey::from_request(request).description(),
      class = ?class,
      "handling request"
    );

    let fetch = || self.fetcher.fetch(request);

    let result = match class {
      RequestClass::Navigation => {
        let offline = Request::get(self.config.offline_url.clone());
        self
          .cache
          .network_first(request, StorePolicy::Any, Some(&offline), fetch)
          .await
      }
      RequestClass::CdnAsset => self.cache.cache_first(request, fetch).await,
      RequestClass::Dynamic => {
        self
          .cache
          .network_first(request, StorePolicy::StatusOk, None, fetch)
          .await
      }
    };

    match &result {
      Ok(served) => debug!(
        url = %request.url,
        status = served.data.status,
        source = %served.source,
        "served"
      ),
      Err(e) => warn!(url = %request.url, error = %e, "request failed"),
    }

    result
  }

  /// Wait for background cache writes to finish.
  pub async fn settle(&self) {
    self.cache.settle().await;
  }

  /// All generation tags currently in the store.
  pub fn generations(&self) -> Result<Vec<String>> {
    self.storage.generations()
  }

  /// Request keys stored in the current generation.
  pub fn entries(&self) -> Result<Vec<RequestKey>> {
    self.storage.entries(self.generation())
  }
}
