use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use shelter::activation::{ControlMessage, DetachedClients};
use shelter::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use shelter::network::{HttpNetwork, Request};
use shelter::{logging, Agent, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Parser, Debug)]
#[command(name = "shelter")]
#[command(about = "Offline request-interception agent backed by a versioned response cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelter/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current generation from the manifest
  Install,
  /// Retire every other generation
  Activate,
  /// Serve one request through the agent
  Fetch {
    /// Absolute URL, or a path relative to the origin
    url: String,
    /// Treat the request as a document navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Send a control message
  Message {
    #[arg(value_enum)]
    kind: MessageKind,
  },
  /// List stores and their entries
  Status,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MessageKind {
  SkipWaiting,
  GetVersion,
}

impl From<MessageKind> for ControlMessage {
  fn from(kind: MessageKind) -> Self {
    match kind {
      MessageKind::SkipWaiting => ControlMessage::SkipWaiting,
      MessageKind::GetVersion => ControlMessage::GetVersion,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let storage: Arc<dyn CacheStorage> = if args.ephemeral {
    Arc::new(MemoryStorage::new())
  } else {
    match &config.storage.path {
      Some(path) => Arc::new(SqliteStorage::open_at(path)?),
      None => Arc::new(SqliteStorage::open()?),
    }
  };
  let network = Arc::new(HttpNetwork::new(&config.origin, config.network_timeout())?);

  let agent = Agent::new(&config, storage, network, Arc::new(DetachedClients))?;
  agent.restore().await?;

  match args.command {
    Command::Install => {
      let report = agent.on_install().await?;
      println!("store {}", report.store);
      for url in &report.cached {
        println!("  cached  {}", url);
      }
      for skipped in &report.skipped {
        println!("  skipped {} ({})", skipped.entry, skipped.reason);
      }
      println!("state: {}", agent.state());
    }
    Command::Activate => match agent.on_activate().await? {
      Some(report) => {
        println!("kept {}", report.kept);
        for name in &report.deleted {
          println!("  deleted {}", name);
        }
        for name in &report.failed {
          println!("  failed  {}", name);
        }
      }
      None => println!("already active"),
    },
    Command::Fetch { url, navigate } => {
      let url = config.resolve(&url)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };

      let mut served = agent.handle(request).await?;
      println!(
        "{} {} ({:?}, {})",
        served.response.status,
        served.class,
        served.source,
        served.response.body.len()
      );
      // The process is about to exit; let the cache write finish first
      served.settle().await;
    }
    Command::Message { kind } => {
      let (tx, rx) = oneshot::channel();
      agent.on_message(kind.into(), Some(tx)).await?;
      if let Ok(version) = rx.await {
        println!("{}", version);
      } else {
        println!("state: {}", agent.state());
      }
    }
    Command::Status => {
      let current = agent.generation().store_name();
      for name in agent.caches().names().await? {
        let marker = if name == current { "*" } else { " " };
        let keys = agent.caches().store(&name).keys().await?;
        println!("{} {} ({} entries)", marker, name, keys.len());
        for key in keys {
          println!("    {}", key);
        }
      }
      println!("state: {}", agent.state());
    }
  }

  Ok(())
}
