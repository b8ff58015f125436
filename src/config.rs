use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_GENERATION: &str = "stoke-cache-v2";
const DEFAULT_ORIGIN: &str = "http://localhost:8000/";
const DEFAULT_OFFLINE_URL: &str = "/offline/";

const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  DEFAULT_OFFLINE_URL,
  "/static/manifest.webmanifest",
  "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
  "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.11.3/font/bootstrap-icons.min.css",
  "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/js/bootstrap.bundle.min.js",
  "https://cdn.jsdelivr.net/npm/chart.js",
  "https://code.jquery.com/jquery-3.7.1.min.js",
];

const DEFAULT_CDN_HOSTS: &[&str] = &["cdn.jsdelivr.net", "code.jquery.com"];

/// Configuration file contents. Every field may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Tag of the current cache generation; bump it to invalidate old caches
  pub generation: String,
  /// Base URL of the application; relative URLs resolve against it
  pub origin: String,
  /// Document served to navigations when neither network nor cache answer
  pub offline_url: String,
  /// Assets fetched into the cache at install time
  pub precache: Vec<String>,
  /// Hosts whose assets are served cache-first
  pub cdn_hosts: Vec<String>,
  /// Cache database location (defaults to the user data directory)
  pub cache_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      generation: DEFAULT_GENERATION.to_string(),
      origin: DEFAULT_ORIGIN.to_string(),
      offline_url: DEFAULT_OFFLINE_URL.to_string(),
      precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
      cdn_hosts: DEFAULT_CDN_HOSTS.iter().map(|s| s.to_string()).collect(),
      cache_path: None,
    }
  }
}

/// Settings handed to the cache manager, with every URL made absolute.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
  pub generation: String,
  pub origin: Url,
  pub offline_url: Url,
  pub precache: Vec<Url>,
  pub cdn_hosts: Vec<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolve every URL against the origin.
  pub fn resolve(&self) -> Result<ManagerConfig> {
    if self.generation.trim().is_empty() {
      return Err(eyre!("Cache generation tag must not be empty"));
    }

    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    let resolve = |raw: &str| {
      origin
        .join(raw)
        .map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))
    };

    let offline_url = resolve(&self.offline_url)?;
    let precache = self
      .precache
      .iter()
      .map(|raw| resolve(raw))
      .collect::<Result<Vec<_>>>()?;

    let cdn_hosts = self
      .cdn_hosts
      .iter()
      .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
      .filter(|h| !h.is_empty())
      .collect();

    Ok(ManagerConfig {
      generation: self.generation.clone(),
      origin,
      offline_url,
      precache,
      cdn_hosts,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_resolve() {
    let resolved = Config::default().resolve().unwrap();
    assert_eq!(resolved.generation, "stoke-cache-v2");
    assert_eq!(resolved.offline_url.as_str(), "http://localhost:8000/offline/");
    assert_eq!(resolved.precache.len(), 8);
    assert_eq!(resolved.precache[0].as_str(), "http://localhost:8000/");
    assert_eq!(
      resolved.precache[7].as_str(),
      "https://code.jquery.com/jquery-3.7.1.min.js"
    );
    assert!(resolved.precache.contains(&resolved.offline_url));
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config: Config = serde_yaml::from_str(
      "generation: stoke-cache-v3\norigin: https://stoke.example.com/app/\n",
    )
    .unwrap();
    let resolved = config.resolve().unwrap();

    assert_eq!(resolved.generation, "stoke-cache-v3");
    assert_eq!(
      resolved.offline_url.as_str(),
      "https://stoke.example.com/offline/"
    );
    assert_eq!(resolved.cdn_hosts, vec!["cdn.jsdelivr.net", "code.jquery.com"]);
  }

  #[test]
  fn test_cdn_hosts_are_normalized() {
    let config = Config {
      cdn_hosts: vec![" CDN.jsdelivr.net. ".to_string(), "".to_string()],
      ..Config::default()
    };
    assert_eq!(config.resolve().unwrap().cdn_hosts, vec!["cdn.jsdelivr.net"]);
  }

  #[test]
  fn test_empty_generation_rejected() {
    let config = Config {
      generation: "  ".to_string(),
      ..Config::default()
    };
    assert!(config.resolve().is_err());
  }

  #[test]
  fn test_invalid_origin_rejected() {
    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.resolve().is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "generation: test-gen\nprecache:\n  - /\n  - /offline/\ncache_path: /tmp/sc.db"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.generation, "test-gen");
    assert_eq!(config.precache, vec!["/", "/offline/"]);
    assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/sc.db")));
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(dir.path().join("absent.yaml").as_path())).is_err());
  }

  #[test]
  fn test_load_rejects_malformed_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "precache: [unterminated").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }
}
