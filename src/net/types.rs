//! Request and response values passed between the fetcher and the cache.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use url::Url;

/// An outgoing request as seen by the cache manager.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
}

impl Request {
  /// Create a GET request with no headers.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
    }
  }

  /// Parse an absolute URL into a GET request.
  #[allow(dead_code)]
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Add a header, keeping any existing values for the same name.
  pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
    let value = HeaderValue::from_str(value)
      .map_err(|e| eyre!("Invalid value for header {}: {}", name, e))?;
    self.headers.append(name, value);
    Ok(self)
  }

  /// Shorthand for a browser navigation request.
  pub fn navigation(url: Url) -> Self {
    let mut request = Self::get(url);
    request.headers.insert(
      ACCEPT,
      HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    request
  }

  /// True when any `Accept` header value mentions `media_type`.
  pub fn accepts(&self, media_type: &str) -> bool {
    self
      .headers
      .get_all(ACCEPT)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .any(|v| v.contains(media_type))
  }

  pub fn host(&self) -> Option<&str> {
    self.url.host_str()
  }
}

/// A response, either fresh from the network or rebuilt from the cache.
///
/// The body is a shared [`Bytes`] buffer, so `clone()` yields a copy that can
/// be consumed independently of the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  /// Final URL after redirects
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl Response {
  #[allow(dead_code)]
  pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      url,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  /// Status in the 200-299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Headers as (name, value) string pairs. Values that are not valid UTF-8
  /// are skipped.
  pub fn header_pairs(&self) -> Vec<(String, String)> {
    self
      .headers
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect()
  }

  /// Rebuild a header map from stored (name, value) pairs.
  pub fn headers_from_pairs(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid stored value for header {}: {}", name, e))?;
      headers.append(name, value);
    }
    Ok(headers)
  }
}
