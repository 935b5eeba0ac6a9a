use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shelfsync::api::{BookQuery, CacheKey, HttpTransport, LibraryClient, RequestGateway};
use shelfsync::cache::{CacheSource, CacheStorage, NoopStorage, PersistentCache, SqliteStorage};
use shelfsync::clock::{Clock, SystemClock};
use shelfsync::config::Config;
use shelfsync::db::Database;
use shelfsync::error::QueueError;
use shelfsync::event::StatusStore;
use shelfsync::sync::{
  ConnectivityMonitor, MutationOp, MutationQueue, QueueOutcome, SqliteMutationStore, SyncRequester,
  SyncWorker,
};

#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(about = "Offline-first sync client for your reading library")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelfsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the API as unreachable; writes are queued
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, pending writes and cache size
  Status,
  /// Replay queued writes now
  Sync,
  /// List queued writes
  Pending,
  /// Drop every queued write
  DiscardPending,
  /// Read a resource (served from cache when fresh)
  Get {
    #[command(subcommand)]
    target: GetTarget,
  },
  /// Add a book from a JSON object
  CreateBook { data: String },
  /// Patch a book with a JSON object
  UpdateBook { id: i64, updates: String },
  DeleteBook { id: i64 },
  /// Create a learning path from a JSON object
  CreatePath { data: String },
  UpdatePath { id: i64, updates: String },
  DeletePath { id: i64 },
  /// Add a library book to a path
  AddToPath { path_id: i64, user_book_id: i64 },
  RemoveFromPath { path_id: i64, user_book_id: i64 },
  /// Sweep expired cache entries
  Cleanup,
  /// Drop the whole read cache
  ClearCache,
  /// End the session and drop the read cache
  Logout,
  /// Keep syncing in the background; SIGUSR1 requests a sync, Ctrl-C exits
  Watch,
}

#[derive(Subcommand, Debug)]
enum GetTarget {
  Dashboard,
  Pipeline,
  Books {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    search: Option<String>,
  },
  Book { id: i64 },
  Paths,
  Path { id: i64 },
  Stats,
  Settings,
}

impl GetTarget {
  fn cache_key(self) -> CacheKey {
    match self {
      GetTarget::Dashboard => CacheKey::Dashboard,
      GetTarget::Pipeline => CacheKey::Pipeline,
      GetTarget::Books {
        page,
        status,
        search,
      } => CacheKey::Books(BookQuery {
        page,
        status,
        search,
        ..BookQuery::default()
      }),
      GetTarget::Book { id } => CacheKey::Book(id),
      GetTarget::Paths => CacheKey::Paths,
      GetTarget::Path { id } => CacheKey::Path(id),
      GetTarget::Stats => CacheKey::Stats,
      GetTarget::Settings => CacheKey::Settings,
    }
  }
}

/// Initialize logging: everything at `RUST_LOG` (default info) to a daily
/// file, warnings to stderr.
fn init_tracing(data_dir: &Path) -> WorkerGuard {
  let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "shelfsync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(file_filter),
    )
    .with(
      fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::new("warn")),
    )
    .init();

  guard
}

/// Every long-lived service, constructed once and passed by reference.
struct Core {
  config: Config,
  offline: bool,
  status: StatusStore,
  cache: PersistentCache,
  client: LibraryClient,
  queue: Arc<MutationQueue>,
  monitor: ConnectivityMonitor,
}

impl Core {
  fn build(config: Config, offline: bool) -> Result<Self> {
    let db = Database::open(&Database::default_path(&config.data_dir()?))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let storage: Arc<dyn CacheStorage> = if config.cache.enabled {
      Arc::new(SqliteStorage::new(db.conn()))
    } else {
      Arc::new(NoopStorage)
    };
    let cache = PersistentCache::new(storage, clock.clone());

    let transport = Arc::new(HttpTransport::new(
      &config.api.url()?,
      config.api.timeout_secs,
      Config::api_token(),
    )?);
    let status = StatusStore::new(!offline);

    let gateway =
      RequestGateway::new(transport.clone(), cache.clone(), status.clone(), clock.clone())
        .with_retention(config.cache.retention());
    let client = LibraryClient::new(gateway, config.cache.ttl.clone());

    let store = Arc::new(SqliteMutationStore::new(db.conn()));
    let queue = Arc::new(MutationQueue::new(
      store,
      client.clone(),
      status.clone(),
      clock,
    ));
    let monitor = ConnectivityMonitor::new(
      status.clone(),
      queue.clone(),
      transport,
      config.api.health_endpoint.clone(),
    );

    Ok(Self {
      config,
      offline,
      status,
      cache,
      client,
      queue,
      monitor,
    })
  }

  /// Settle the online flag before acting.
  async fn probe(&self) {
    if !self.offline {
      self.monitor.probe_once().await;
    }
  }

  async fn submit(&self, op: MutationOp) -> Result<()> {
    self.probe().await;
    match self.queue.submit(op).await {
      Ok(QueueOutcome::Executed(value)) => print_json(&value),
      Ok(QueueOutcome::Queued { id }) => {
        println!("Offline: change saved as #{} and will sync when you reconnect", id);
        Ok(())
      }
      Err(QueueError::Api(e)) if e.is_connectivity() => {
        println!("Network unreachable: change saved and will sync later");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn watch(&self) -> Result<()> {
    let probe_interval = (!self.offline).then_some(self.config.sync.probe_interval_secs);
    let (worker, requester) = SyncWorker::new(
      self.monitor.clone(),
      self.queue.clone(),
      self.cache.clone(),
      probe_interval,
      self.config.cache.cleanup_interval_secs,
    );
    let worker = tokio::spawn(worker.run());
    spawn_signal_listener(requester.clone());
    requester.request();

    let mut events = self.status.subscribe();
    println!("Watching for changes (Ctrl-C to stop)");
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        event = events.recv() => match event {
          Ok(event) => {
            println!("{}", event);
            if let Some(banner) = self.status.snapshot().banner() {
              println!("{}", banner);
            }
          }
          Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Event subscriber lagged");
          }
          Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        },
      }
    }

    drop(requester);
    worker.abort();
    Ok(())
  }
}

#[cfg(unix)]
fn spawn_signal_listener(requester: SyncRequester) {
  use tokio::signal::unix::{signal, SignalKind};

  tokio::spawn(async move {
    let mut usr1 = match signal(SignalKind::user_defined1()) {
      Ok(stream) => stream,
      Err(e) => {
        warn!(error = %e, "Failed to listen for SIGUSR1");
        return;
      }
    };
    while usr1.recv().await.is_some() {
      info!("SIGUSR1 received, requesting sync");
      if !requester.request() {
        break;
      }
    }
  });
}

#[cfg(not(unix))]
fn spawn_signal_listener(_requester: SyncRequester) {}

fn parse_json(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON argument: {}", e))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.data_dir()?);
  info!(offline = args.offline, "shelfsync starting");

  let core = Core::build(config, args.offline)?;

  match args.command {
    Command::Status => {
      core.probe().await;
      let snapshot = core.status.snapshot();
      println!("online:        {}", snapshot.online);
      println!("authenticated: {}", snapshot.authenticated);
      println!("pending:       {}", snapshot.pending);
      println!("cached items:  {}", core.cache.stats().item_count);
      if let Some(banner) = snapshot.banner() {
        println!("\n{}", banner);
      }
    }
    Command::Sync => {
      core.probe().await;
      if !core.status.is_online() {
        println!("Offline: {} changes waiting", core.queue.pending_count());
        return Ok(());
      }
      let report = core.queue.sync().await;
      match report.summary() {
        Some(summary) => println!("{}", summary),
        None => println!("Nothing to sync"),
      }
    }
    Command::Pending => {
      for mutation in core.queue.get_all() {
        println!(
          "#{:<5} {:<16} attempt {}  {}  {}",
          mutation.id,
          mutation.kind,
          mutation.attempt,
          mutation.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          mutation
            .payload
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<unreadable>".to_string())
        );
      }
    }
    Command::DiscardPending => {
      let count = core.queue.pending_count();
      core.queue.clear();
      println!("Discarded {} pending changes", count);
    }
    Command::Get { target } => {
      core.probe().await;
      let result = core.client.read(&target.cache_key()).await?;
      match (result.source, result.cached_at) {
        (CacheSource::Offline, Some(at)) => eprintln!("(offline, cached {})", at.to_rfc3339()),
        (CacheSource::CacheFresh, Some(at)) => eprintln!("(cached {})", at.to_rfc3339()),
        _ => {}
      }
      print_json(&result.data)?;
    }
    Command::CreateBook { data } => core.submit(MutationOp::BookCreate(parse_json(&data)?)).await?,
    Command::UpdateBook { id, updates } => {
      core
        .submit(MutationOp::BookUpdate {
          id,
          updates: parse_json(&updates)?,
        })
        .await?
    }
    Command::DeleteBook { id } => core.submit(MutationOp::BookDelete { id }).await?,
    Command::CreatePath { data } => core.submit(MutationOp::PathCreate(parse_json(&data)?)).await?,
    Command::UpdatePath { id, updates } => {
      core
        .submit(MutationOp::PathUpdate {
          id,
          updates: parse_json(&updates)?,
        })
        .await?
    }
    Command::DeletePath { id } => core.submit(MutationOp::PathDelete { id }).await?,
    Command::AddToPath {
      path_id,
      user_book_id,
    } => {
      core
        .submit(MutationOp::PathAddBook {
          path_id,
          user_book_id,
        })
        .await?
    }
    Command::RemoveFromPath {
      path_id,
      user_book_id,
    } => {
      core
        .submit(MutationOp::PathRemoveBook {
          path_id,
          user_book_id,
        })
        .await?
    }
    Command::Cleanup => {
      let removed = core.cache.cleanup();
      println!("Removed {} expired cache entries", removed);
    }
    Command::ClearCache => {
      core.cache.clear();
      println!("Cache cleared");
    }
    Command::Logout => {
      core.probe().await;
      match core.client.logout().await {
        Ok(_) => println!("Logged out"),
        Err(e) => println!("Logged out locally ({})", e),
      }
    }
    Command::Watch => core.watch().await?,
  }

  Ok(())
}
