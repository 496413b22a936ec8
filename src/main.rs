use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use error::Error;
use rpc::ChainSource;
use serve::{AppContext, AppState};
use shutdown::ShutdownSignal;
use storage::kv_store::StorageHandler;
use sync::Network;
use wallet::import::TransactionImporter;
use writer::{TaskSubmitter, WriterClient};

pub use storage::encdec::{DecodingError, DecodingResult};

mod error;
pub mod rpc;
pub mod serve;
pub mod shutdown;
pub mod storage;
pub mod sync;
pub mod tables;
pub mod wallet;
pub mod writer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();

    if let Err(e) = run(args).await {
        error!("{e}");

        let code = match e {
            Error::ShutdownTimeout(_) => 2,
            _ => 1,
        };

        std::process::exit(code);
    }
}

async fn run(args: Cli) -> Result<(), Error> {
    let config = Config::new(&args.config)?;

    info!(
        network = ?config.network,
        db = %config.storage.path().display(),
        "loaded config"
    );

    match args.command {
        Command::Writer => {
            let shutdown = ShutdownSignal::new();
            shutdown.listen_for_signals();

            let db = open_store(&config, false)?;
            let source = chain_source(&config)?;

            tokio::spawn(storage::stats_logger::start_stats_logger(
                db.clone(),
                shutdown.clone(),
            ));

            run_writer(&config, source, db, shutdown).await
        }
        Command::Serve => {
            let shutdown = ShutdownSignal::new();
            shutdown.listen_for_signals();

            let db = open_store(&config, true)?;
            let source = chain_source(&config)?;
            let client = WriterClient::connect(&config.writer.socket_path()).await?;

            let state = app_state(&config, db, source, Arc::new(client));

            serve::run(state, config.serve.address(), shutdown).await
        }
        Command::Run => {
            let shutdown = ShutdownSignal::new();
            shutdown.listen_for_signals();

            let db = open_store(&config, false)?;
            let source = chain_source(&config)?;

            tokio::spawn(storage::stats_logger::start_stats_logger(
                db.clone(),
                shutdown.clone(),
            ));

            let writer = run_writer(&config, source.clone(), db.clone(), shutdown.clone());
            tokio::pin!(writer);

            let socket_path = config.writer.socket_path();
            let client = tokio::select! {
                res = &mut writer => return res,
                client = connect_when_ready(&socket_path) => client?,
            };

            let state = app_state(&config, db, source, Arc::new(client));
            let server = serve::run(state, config.serve.address(), shutdown.clone());

            let (writer_res, server_res) = tokio::join!(writer, async {
                let res = server.await;
                // the api going down takes the writer with it
                shutdown.trigger();
                res
            });

            server_res.and(writer_res)
        }
        Command::Dump => {
            let db = open_store(&config, true)?;
            let reader = db.reader()?;

            for kv in reader.raw_kvs() {
                let (key, value) = kv?;
                println!("{} -> {}", hex::encode(&key), hex::encode(&value));
            }

            Ok(())
        }
    }
}

fn open_store(config: &Config, read_only: bool) -> Result<StorageHandler, Error> {
    StorageHandler::open(
        config.storage.path(),
        read_only,
        config.storage.rocksdb_memory_budget_bytes(),
    )
}

fn chain_source(config: &Config) -> Result<Arc<dyn ChainSource>, Error> {
    Ok(Arc::new(config.node.pool()?))
}

fn app_state(
    config: &Config,
    db: StorageHandler,
    source: Arc<dyn ChainSource>,
    submitter: Arc<dyn TaskSubmitter>,
) -> AppState {
    let importer = TransactionImporter::new(
        db.clone(),
        source,
        submitter.clone(),
        config.network,
        config.serve.safe_confirmations(),
    );

    Arc::new(AppContext {
        db,
        importer,
        submitter,
        network: config.network,
        started_at: Utc::now(),
        auth_token: config.serve.auth_token.clone(),
    })
}

/// Run the writer until it stops by itself, or until shutdown plus the grace period
async fn run_writer(
    config: &Config,
    source: Arc<dyn ChainSource>,
    db: StorageHandler,
    shutdown: ShutdownSignal,
) -> Result<(), Error> {
    let daemon = writer::pipeline(
        &config.writer,
        &config.sync,
        config.network,
        source,
        db,
        shutdown.clone(),
    )?;

    let mut blocked = tokio::task::spawn_blocking(move || daemon.block());

    tokio::select! {
        res = &mut blocked => {
            res.map_err(Error::custom)?;
            warn!("writer stopped");

            // a writer which stops on its own failed, take the rest of the process down
            if !shutdown.is_triggered() {
                shutdown.trigger();
                return Err(Error::custom("writer stopped unexpectedly"));
            }
        }
        _ = shutdown.triggered() => {
            let grace = config.writer.shutdown_grace();

            match tokio::time::timeout(grace, &mut blocked).await {
                Ok(res) => {
                    res.map_err(Error::custom)?;
                    info!("writer stopped");
                }
                Err(_) => return Err(Error::ShutdownTimeout(config.writer.shutdown_grace_secs())),
            }
        }
    }

    Ok(())
}

async fn connect_when_ready(path: &std::path::Path) -> Result<WriterClient, Error> {
    let mut attempts = 0;

    loop {
        match WriterClient::connect(path).await {
            Ok(client) => return Ok(client),
            Err(e) if attempts >= 50 => return Err(e),
            Err(_) => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow the chain and own all writes to the index
    Writer,
    /// Serve the HTTP api from a read-only view of the index
    Serve,
    /// Writer and api in one process
    Run,
    /// Print every raw key and value of the index
    Dump,
}

#[derive(Debug, Parser)]
#[clap(name = "wallet-symphony")]
#[clap(bin_name = "wallet-symphony")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub storage: storage::Config,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub node: rpc::Config,
    #[serde(default)]
    pub sync: sync::Config,
    #[serde(default)]
    pub writer: writer::Config,
    #[serde(default)]
    pub serve: serve::ServerConfig,
}

impl Config {
    pub fn new(config_path: &Option<PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("symphony.toml").required(false));

        if let Some(explicit) = config_path.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::with_prefix("SYMPHONY").separator("_"));

        s.build()?.try_deserialize()
    }
}
