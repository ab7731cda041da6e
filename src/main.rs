mod client;
mod config;
mod creds;
mod server;
mod store;

use anyhow::{Context, bail};
use clap::Parser;
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use client::Client;
use config::{Config, LogConfig};
use creds::CredentialSet;
use server::{AppState, Server};
use store::MemoryStore;

/// Environment variable holding the store URL in client mode
const STORE_ENV: &str = "KVSTORE";
/// Environment variable holding the credential in client mode
const CRED_ENV: &str = "KVCRED";

/// In-memory key-value store served over HTTP, and its client
#[derive(Debug, Parser)]
#[command(name = "kvstore", author, version, about)]
struct Arguments {
  /// HTTP listen address
  #[arg(long)]
  listen: Option<String>,

  /// Creds json file containing client credentials
  #[arg(long)]
  creds: Option<String>,

  /// TOML configuration file
  #[arg(long)]
  config: Option<String>,

  /// Get from kvstore
  #[arg(long, conflicts_with = "set")]
  get: bool,

  /// Set key value to kvstore
  #[arg(long)]
  set: bool,

  /// Kvstore key
  #[arg(short = 'k')]
  key: Option<String>,

  /// Kvstore value
  #[arg(short = 'v', default_value = "")]
  value: String,
}

impl Arguments {
  fn client_mode(&self) -> bool {
    self.get || self.set
  }

  /// Load the config file, if any, and apply flag overrides
  fn config(&self) -> anyhow::Result<Config> {
    let mut config = match &self.config {
      Some(path) => Config::from_file(path)?,
      None => Config::default(),
    };
    if let Some(listen) = &self.listen {
      config.server.listen = listen.clone();
    }
    if let Some(creds) = &self.creds {
      config.server.creds = creds.clone();
    }
    Ok(config)
  }
}

#[tokio::main]
async fn main() -> ExitCode {
  let args = Arguments::parse();

  let result = match args.config() {
    Ok(config) => run(&args, config).await,
    Err(e) => Err(e),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}

async fn run(args: &Arguments, config: Config) -> anyhow::Result<()> {
  init_logging(&config.log, args.client_mode())?;

  if args.client_mode() {
    run_client(args, &config).await
  } else {
    serve(&config).await
  }
}

/// Initialize logging
///
/// `RUST_LOG` overrides the configured level. The client logs to stderr at
/// `warn` so stdout only carries values.
fn init_logging(log: &LogConfig, client_mode: bool) -> anyhow::Result<()> {
  let default_level = if client_mode { "warn" } else { log.level.as_str() };
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_level))
    .with_context(|| format!("invalid log level '{}'", default_level))?;

  let writer = match &log.file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("unable to open log file {}", path))?;
      BoxMakeWriter::new(Mutex::new(file))
    }
    None if client_mode => BoxMakeWriter::new(std::io::stderr),
    None => BoxMakeWriter::new(std::io::stdout),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(log.file.is_none())
    .with_target(true)
    .with_thread_ids(true)
    .init();
  Ok(())
}

async fn serve(config: &Config) -> anyhow::Result<()> {
  info!("Starting kvstore");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));

  let creds = CredentialSet::load(&config.server.creds).context("init failed")?;
  info!(count = creds.len(), file = %config.server.creds, "Loaded client credentials");

  let state = Arc::new(AppState::new(Arc::new(MemoryStore::new()), creds));
  let server = Server::bind(&config.server, state)
    .await
    .with_context(|| format!("unable to listen on {}", config.server.listen))?;
  info!("Server listening on: {}", server.local_addr());

  server.run().await.context("server crashed")
}

async fn run_client(args: &Arguments, config: &Config) -> anyhow::Result<()> {
  let store = std::env::var(STORE_ENV).unwrap_or_default();
  let cred = std::env::var(CRED_ENV).unwrap_or_default();
  let key = client_key(&store, &cred, args.key.as_deref())?;

  let client = Client::connect(&store, &cred, config.client.timeout())
    .await
    .with_context(|| format!("unable to connect to store {}", store))?;

  if args.get {
    let value = client.get(key).await.context("unable to get from store")?;
    println!("{}", value);
  } else {
    client
      .set(key, &args.value)
      .await
      .context("unable to set in store")?;
  }
  Ok(())
}

/// Check client-mode inputs before touching the network, returning the key
fn client_key<'a>(store: &str, cred: &str, key: Option<&'a str>) -> anyhow::Result<&'a str> {
  if store.is_empty() || cred.is_empty() {
    bail!(
      "kvstore client cannot get/set without ${} and ${} in env",
      STORE_ENV,
      CRED_ENV
    );
  }

  match key {
    Some(key) if !key.is_empty() => Ok(key),
    _ => bail!("kvstore cannot get/set without key -k"),
  }
}
