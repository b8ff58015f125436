//! Network side of the cache: request/response values and the fetcher that
//! performs live requests.

pub mod client;
pub mod types;

#[cfg(test)]
pub mod stub;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Request, Response};
