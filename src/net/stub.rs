//! Scripted fetcher for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::client::Fetcher;
use super::types::{Request, Response};

/// Answers from a table of URL -> response; unknown or failed URLs behave
/// like an unreachable network.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Option<Response>>>,
  calls: AtomicUsize,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `body` with `status` for `url`.
  pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
    self.set(url, status, body);
    self
  }

  /// Make `url` fail at the network level.
  pub fn fail(self, url: &str) -> Self {
    self.set_failing(url);
    self
  }

  pub fn set(&self, url: &str, status: u16, body: &str) {
    let parsed = Url::parse(url).expect("stub url");
    let response = Response::new(status, parsed, body.to_string());
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(response));
  }

  pub fn set_failing(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), None);
  }

  /// Number of fetches performed so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let routes = self.routes.lock().unwrap();
    match routes.get(request.url.as_str()) {
      Some(Some(response)) => Ok(response.clone()),
      _ => Err(eyre!("network unreachable: {}", request.url)),
    }
  }
}
