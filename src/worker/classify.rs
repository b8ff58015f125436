//! Request classification.

use crate::net::Request;

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Page navigation: network-first, offline document as last resort
  Navigation,
  /// Third-party static asset: cache-first
  CdnAsset,
  /// First-party dynamic request: network-first, cache only on 200
  Dynamic,
}

/// Classify a request. First match wins: an HTML navigation to a CDN host is
/// still a navigation.
pub fn classify(request: &Request, cdn_hosts: &[String]) -> RequestClass {
  if request.accepts("text/html") {
    return RequestClass::Navigation;
  }

  match request.host() {
    Some(host) if is_cdn_host(host, cdn_hosts) => RequestClass::CdnAsset,
    _ => RequestClass::Dynamic,
  }
}

/// A host matches an allow-listed name exactly or as a subdomain of it.
fn is_cdn_host(host: &str, cdn_hosts: &[String]) -> bool {
  let host = host.to_ascii_lowercase();
  cdn_hosts.iter().any(|cdn| {
    host == *cdn
      || host
        .strip_suffix(cdn.as_str())
        .is_some_and(|prefix| prefix.ends_with('.'))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::ACCEPT;

  fn hosts() -> Vec<String> {
    vec!["cdn.jsdelivr.net".to_string(), "code.jquery.com".to_string()]
  }

  fn req(url: &str) -> Request {
    Request::parse(url).unwrap()
  }

  #[test]
  fn test_html_accept_is_navigation() {
    let r = req("http://localhost:8000/estoque/")
      .with_header(ACCEPT, "text/html,application/xhtml+xml")
      .unwrap();
    assert_eq!(classify(&r, &hosts()), RequestClass::Navigation);
  }

  #[test]
  fn test_navigation_wins_over_cdn() {
    let r = req("https://cdn.jsdelivr.net/npm/chart.js")
      .with_header(ACCEPT, "text/html")
      .unwrap();
    assert_eq!(classify(&r, &hosts()), RequestClass::Navigation);
  }

  #[test]
  fn test_cdn_hosts() {
    assert_eq!(
      classify(&req("https://code.jquery.com/jquery-3.7.1.min.js"), &hosts()),
      RequestClass::CdnAsset
    );
    assert_eq!(
      classify(&req("https://fastly.cdn.jsdelivr.net/npm/x.js"), &hosts()),
      RequestClass::CdnAsset
    );
  }

  #[test]
  fn test_lookalike_host_is_not_cdn() {
    assert_eq!(
      classify(&req("https://evilcdn.jsdelivr.net.example.com/x.js"), &hosts()),
      RequestClass::Dynamic
    );
    assert_eq!(
      classify(&req("https://notcode.jquery.com.evil/x.js"), &hosts()),
      RequestClass::Dynamic
    );
    assert_eq!(
      classify(&req("https://xcode.jquery.com/x.js"), &hosts()),
      RequestClass::Dynamic
    );
  }

  #[test]
  fn test_first_party_api_is_dynamic() {
    let r = req("http://localhost:8000/api/produtos/")
      .with_header(ACCEPT, "application/json")
      .unwrap();
    assert_eq!(classify(&r, &hosts()), RequestClass::Dynamic);
  }
}
