use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use offline_sync::engine::LAST_SYNC_TIME;
use offline_sync::{
  Config, ConnectivitySource, EngineError, EngineEvent, HttpApiClient, OfflineEngine, Params,
  ResourceType, SyncAction, TaskId,
};

#[derive(Parser, Debug)]
#[command(name = "offline-sync")]
#[command(about = "Offline cache and sync queue for dashboard displays")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the monitor, periodic sync and cleanup until interrupted
  Run,
  /// Print connectivity, queue and cache status
  Status,
  /// Drain the queue and refresh critical data now
  Sync,
  /// Fetch a resource, falling back to the cache
  Fetch {
    /// dashboard-stats, priority-tasks, today-meetings or inbox-stats
    #[arg(value_parser = parse_resource)]
    resource: ResourceType,
    /// Extra query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Queue a mutation for delivery
  Enqueue {
    /// COMPLETE_TASK, UPDATE_TASK, CREATE_TASK or MARK_NOTIFICATION_READ
    #[arg(value_parser = parse_action)]
    action: SyncAction,
    /// JSON payload
    payload: String,
  },
  /// List tasks that ran out of retries
  DeadLetters,
  /// Put a dead-lettered task back on the queue
  Replay { id: TaskId },
  /// Empty all cache partitions (the queue is kept)
  ClearCache,
  /// Delete cache records older than the max age
  Cleanup,
}

fn parse_resource(s: &str) -> Result<ResourceType, String> {
  s.parse().map_err(|e: color_eyre::Report| e.to_string())
}

fn parse_action(s: &str) -> Result<SyncAction, String> {
  s.parse()
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Online while the API host accepts TCP connections.
struct Reachability {
  tx: watch::Sender<bool>,
  host: String,
  port: u16,
}

impl Reachability {
  fn for_url(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid API URL '{}': {}", url, e))?;
    let host = url
      .host_str()
      .ok_or_else(|| eyre!("API URL '{}' has no host", url))?
      .to_string();
    let port = url
      .port_or_known_default()
      .ok_or_else(|| eyre!("API URL '{}' has no port", url))?;
    let (tx, _) = watch::channel(false);
    Ok(Self { tx, host, port })
  }

  async fn check(&self) -> bool {
    let connect = TcpStream::connect((self.host.as_str(), self.port));
    let reachable = matches!(
      tokio::time::timeout(Duration::from_secs(2), connect).await,
      Ok(Ok(_))
    );
    self.tx.send_if_modified(|current| {
      let changed = *current != reachable;
      *current = reachable;
      changed
    });
    reachable
  }

  async fn watch(self: Arc<Self>, every: Duration) {
    let mut tick = tokio::time::interval(every);
    loop {
      tick.tick().await;
      let online = self.check().await;
      debug!(online, host = %self.host, "Reachability checked");
    }
  }
}

impl ConnectivitySource for Reachability {
  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }
}

fn log_dir() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("offline-sync")
    .join("logs")
}

/// File logging for the long-running command, stderr otherwise.
fn init_tracing(to_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_sync=info"));

  if to_file {
    let appender = tracing_appender::rolling::daily(log_dir(), "offline-sync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();
    Some(guard)
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    None
  }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(matches!(args.command, Command::Run));

  let config = Config::load(args.config.as_deref())?;
  let reachability = Arc::new(Reachability::for_url(&config.api.url)?);
  reachability.check().await;

  let api = Arc::new(HttpApiClient::new(&config)?);
  let engine = Arc::new(OfflineEngine::open(&config, api, reachability.clone()));

  let result = run_command(args.command, &engine, &config, reachability).await;
  engine.shutdown().await;
  result
}

async fn run_command(
  command: Command,
  engine: &Arc<OfflineEngine>,
  config: &Config,
  reachability: Arc<Reachability>,
) -> Result<()> {
  match command {
    Command::Run => run(engine, config, reachability).await,
    Command::Status => print_json(&engine.status()?),
    Command::Sync => match engine.force_sync_now().await {
      Ok(summary) => print_json(&summary),
      Err(e) if EngineError::find(&e) == Some(&EngineError::Offline) => {
        Err(eyre!("API host is unreachable, nothing was synced"))
      }
      Err(e) => Err(e),
    },
    Command::Fetch { resource, params } => {
      let params: Params = params.into_iter().collect();
      let result = engine.fetch_with_fallback(resource, &params).await?;
      info!(source = ?result.source, cached_at = ?result.cached_at, "Fetched {}", resource);
      print_json(&result.data)
    }
    Command::Enqueue { action, payload } => {
      let payload = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let id = engine.enqueue(action, payload)?;
      println!("{}", id);
      Ok(())
    }
    Command::DeadLetters => print_json(&engine.dead_letters()?),
    Command::Replay { id } => match engine.replay_dead_letter(id)? {
      Some(new_id) => {
        println!("{}", new_id);
        Ok(())
      }
      None => Err(eyre!("No dead letter with id {}", id)),
    },
    Command::ClearCache => engine.clear_all_cache(),
    Command::Cleanup => {
      let removed = engine.cleanup()?;
      println!("{}", removed);
      Ok(())
    }
  }
}

async fn run(
  engine: &Arc<OfflineEngine>,
  config: &Config,
  reachability: Arc<Reachability>,
) -> Result<()> {
  let watcher = tokio::spawn(reachability.watch(config.probe_interval()));
  engine.start_background()?;

  let mut events = engine.subscribe();
  let store = config
    .storage
    .path
    .as_ref()
    .map(|p| p.display().to_string())
    .unwrap_or_else(|| "default".to_string());
  info!(%store, online = engine.is_online(), "Offline engine running");
  if let Ok(Some(last)) = engine.get_setting(LAST_SYNC_TIME) {
    debug!(%last, "Last sync");
  }

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("Interrupted, shutting down");
        break;
      }
      event = events.recv() => match event {
        Ok(EngineEvent::TaskDeadLettered { id, action, attempts, last_error }) => {
          warn!(id, %action, attempts, error = %last_error, "Task dead-lettered");
        }
        Ok(event) => debug!(?event, "Engine event"),
        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
          debug!(skipped = n, "Event listener lagged");
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
    }
  }

  watcher.abort();
  Ok(())
}
