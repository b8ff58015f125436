//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::{CachedResponse, RequestKey};
use crate::db::Database;
use crate::net::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations, each mapping request
/// keys to stored responses. Implementations must tolerate concurrent
/// callers; concurrent writes to the same key resolve last-writer-wins.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Names of all existing generations.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and everything in it. Returns false if it did not exist.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Look up a stored response.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Keys stored in a generation, ordered by URL.
  fn entries(&self, generation: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Mutex<Database>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Ok(Self {
      db: Mutex::new(Database::open(path)?),
    })
  }

  /// A throwaway store that lives as long as this value.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Ok(Self {
      db: Mutex::new(Database::open_in_memory()?),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Database>> {
    self.db.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn open(&self, generation: &str) -> Result<()> {
    let db = self.lock()?;
    db.conn()
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open cache generation {}: {}", generation, e))?;
    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let db = self.lock()?;
    let mut stmt = db
      .conn()
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let db = self.lock()?;
    let deleted = db
      .conn()
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", generation, e))?;
    Ok(deleted > 0)
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let db = self.lock()?;
    let mut stmt = db
      .conn()
      .prepare(
        "SELECT status, response_url, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.description(), e))?;

    let Some((status, response_url, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let url = Url::parse(&response_url)
      .map_err(|e| eyre!("Invalid stored URL '{}': {}", response_url, e))?;
    let pairs: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    let response = Response {
      status,
      url,
      headers: Response::headers_from_pairs(&pairs)?,
      body: body.into(),
    };

    Ok(Some(CachedResponse {
      response,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()> {
    if !key.is_get() {
      return Err(eyre!(
        "Cannot cache {}: only GET requests can be stored",
        key.description()
      ));
    }

    let headers = serde_json::to_string(&response.header_pairs())
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let db = self.lock()?;
    db.conn()
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (generation, request_hash, method, url, status, response_url, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          response.url.as_str(),
          headers,
          &response.body[..],
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key.description(), generation, e))?;

    Ok(())
  }

  fn entries(&self, generation: &str) -> Result<Vec<RequestKey>> {
    let db = self.lock()?;
    let mut stmt = db
      .conn()
      .prepare("SELECT method, url FROM cache_entries WHERE generation = ? ORDER BY url, method")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
