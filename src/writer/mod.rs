use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::sync::{Notify, mpsc};

use crate::{
    error::Error,
    shutdown::ShutdownSignal,
    storage::kv_store::StorageHandler,
    sync::{self, Network, engine::SyncEngine, tip::watch_tip},
};

pub mod client;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod stage;
pub mod tasks;

pub use client::{TaskSubmitter, WriterClient};

const DEFAULT_SOCKET_PATH: &str = "./tmp/writer.sock";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 600;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub socket_path: Option<PathBuf>,

    /// How long to wait for the writer to stop after a shutdown request
    pub shutdown_grace_secs: Option<u64>,
}

impl Config {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| DEFAULT_SOCKET_PATH.into())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs())
    }

    pub fn shutdown_grace_secs(&self) -> u64 {
        self.shutdown_grace_secs
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS)
    }
}

// sync failures end the stage instead of being retried
fn gasket_policy() -> gasket::runtime::Policy {
    let no_retries = gasket::retries::Policy {
        max_retries: 0,
        backoff_unit: Duration::from_secs(1),
        backoff_factor: 2,
        max_backoff: Duration::from_secs(1),
        ..Default::default()
    };

    gasket::runtime::Policy {
        tick_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS).into(),
        bootstrap_retry: no_retries.clone(),
        work_retry: no_retries.clone(),
        teardown_retry: no_retries,
    }
}

/// Start the writer role: the socket server and tip watcher on the current runtime, and the
/// writer stage on its own gasket thread. Must be called from within a tokio runtime.
pub fn pipeline(
    config: &Config,
    sync_config: &sync::Config,
    network: Network,
    source: stage::Source,
    db: StorageHandler,
    shutdown: ShutdownSignal,
) -> Result<gasket::daemon::Daemon, Error> {
    let socket_path = config.socket_path();
    let listener = server::bind(&socket_path)?;

    let (inbox, receiver) = mpsc::unbounded_channel();
    let new_tip = Arc::new(Notify::new());

    let engine = SyncEngine::new(source.clone(), db, sync_config, shutdown.clone())?;
    let runner = tasks::TaskRunner::new(network, sync_config.history_chunk_size());

    let writer = stage::Stage::new(engine, runner, receiver, new_tip.clone(), shutdown.clone());

    tokio::spawn(server::serve(
        listener,
        socket_path,
        inbox,
        shutdown.clone(),
    ));

    tokio::spawn(watch_tip(
        source,
        sync_config.poll_interval(),
        new_tip,
        shutdown,
    ));

    let writer = gasket::runtime::spawn_stage(writer, gasket_policy());

    Ok(gasket::daemon::Daemon::new(vec![writer]))
}
