mod cache;
mod config;
mod db;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use reqwest::Method;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::SqliteStorage;
use net::{HttpFetcher, Request};
use worker::{OfflineCacheManager, WorkerState};

type Manager = OfflineCacheManager<SqliteStorage, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline cache for a web app shell: precache, sweep and serve requests")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database path (overrides the config file)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Cache generation tag (overrides the config file)
  #[arg(short, long, global = true)]
  generation: Option<String>,

  /// Append logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install: precache the app shell into the current generation
  Install,
  /// Activate an installed generation and delete all others
  Activate,
  /// Serve one request through the cache
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// Accept header to send (use text/html for a page navigation)
    #[arg(long)]
    accept: Option<String>,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
    /// Write the response body to stdout
    #[arg(long)]
    body: bool,
  },
  /// Install, activate, then serve each URL as a page navigation
  Run {
    /// Absolute URLs or paths relative to the configured origin
    urls: Vec<String>,
  },
  /// List cache generations in the store
  Generations,
  /// List requests stored in the current generation
  Entries,
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug). The returned
/// guard must live until exit so buffered lines are flushed.
fn init_tracing(log_file: Option<&Path>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      tracing_appender::non_blocking(file)
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration, then apply command line overrides
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(generation) = args.generation {
    config.generation = generation;
  }
  if let Some(db) = args.db {
    config.cache_path = Some(db);
  }

  let db_path = match &config.cache_path {
    Some(path) => path.clone(),
    None => db::Database::default_path()?,
  };
  let resolved = config.resolve()?;
  let origin = resolved.origin.clone();

  let storage = Arc::new(SqliteStorage::open(&db_path)?);
  let fetcher = Arc::new(HttpFetcher::new()?);
  let manager = OfflineCacheManager::new(resolved, storage, fetcher)?;
  info!(generation = manager.generation(), db = %db_path.display(), "cache opened");

  match args.command {
    Command::Install => install(&manager).await?,
    Command::Activate => {
      let manager = manager.with_state(WorkerState::Installed);
      activate(&manager).await?;
    }
    Command::Fetch {
      url,
      accept,
      method,
      body,
    } => {
      let manager = manager.with_state(WorkerState::Activated);
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = Request::get(resolve_target(&origin, &url)?).with_method(method);
      if let Some(accept) = accept {
        request = request.with_header(ACCEPT, &accept)?;
      }
      let result = serve(&manager, &request, body).await;
      manager.settle().await;
      result?;
    }
    Command::Run { urls } => {
      install(&manager).await?;
      activate(&manager).await?;
      for url in urls {
        let request = Request::navigation(resolve_target(&origin, &url)?);
        if let Err(e) = serve(&manager, &request, false).await {
          eprintln!("{}: {}", request.url, e);
        }
      }
      manager.settle().await;
    }
    Command::Generations => {
      for name in manager.generations()? {
        let marker = if name == manager.generation() { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Entries => {
      for key in manager.entries()? {
        println!("{}", key.description());
      }
    }
  }

  Ok(())
}

async fn install(manager: &Manager) -> Result<()> {
  let report = manager.initialize().await?;
  println!(
    "installed {}: {} cached, {} skipped",
    manager.generation(),
    report.cached.len(),
    report.failed.len()
  );
  for (url, reason) in &report.failed {
    println!("  skipped {}: {}", url, reason);
  }
  info!(
    skip_waiting = manager.lifecycle().skip_waiting_requested(),
    "install phase finished"
  );
  Ok(())
}

async fn activate(manager: &Manager) -> Result<()> {
  let report = manager.activate_and_sweep().await?;
  println!(
    "activated {}: {} stale generation(s) deleted",
    manager.generation(),
    report.deleted.len()
  );
  for (name, reason) in &report.failed {
    println!("  could not delete {}: {}", name, reason);
  }
  info!(
    clients_claimed = manager.lifecycle().clients_claimed(),
    "activate phase finished"
  );
  Ok(())
}

async fn serve(manager: &Manager, request: &Request, dump_body: bool) -> Result<()> {
  let served = manager.handle_request(request).await?;
  let label = match served.cached_at {
    Some(at) => format!("{}, cached {}", served.source, at.format("%Y-%m-%d %H:%M:%S UTC")),
    None => served.source.to_string(),
  };
  println!(
    "{} {} [{}] {} bytes",
    served.data.status,
    request.url,
    label,
    served.data.body.len()
  );
  if dump_body {
    std::io::stdout()
      .write_all(&served.data.body)
      .map_err(|e| eyre!("Failed to write body: {}", e))?;
  }
  Ok(())
}

/// Accept absolute URLs as-is; resolve anything else against the origin.
fn resolve_target(origin: &url::Url, target: &str) -> Result<url::Url> {
  origin
    .join(target)
    .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
}
