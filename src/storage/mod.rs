use serde::Deserialize;
use sysinfo::System;
use tracing::info;

pub mod encdec;
pub mod kv_store;
pub mod stats_logger;
pub mod table;

const DEFAULT_DB_PATH: &str = "./tmp/symphony";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Directory holding the RocksDB files (default ./tmp/symphony)
    pub path: Option<std::path::PathBuf>,

    /// Total memory budget for RocksDB in GB (default 40% of available system memory)
    pub rocksdb_memory_budget: Option<f64>,
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const DEFAULT_MEMORY_SHARE: f64 = 0.4;

impl Config {
    pub fn path(&self) -> std::path::PathBuf {
        self.path.clone().unwrap_or_else(|| DEFAULT_DB_PATH.into())
    }

    pub fn rocksdb_memory_budget_bytes(&self) -> u64 {
        match self.rocksdb_memory_budget {
            Some(gb) => (gb * GIB) as u64,
            None => {
                let mut system = System::new();
                system.refresh_memory();

                // respect container limits over the host's memory
                let available = system
                    .cgroup_limits()
                    .map(|x| x.total_memory)
                    .unwrap_or_else(|| system.total_memory());

                let budget = share_of(available);

                info!(
                    budget_gb = format!("{:.2}", budget as f64 / GIB),
                    available_gb = format!("{:.2}", available as f64 / GIB),
                    "no rocksdb memory budget configured, using 40% of memory"
                );

                budget
            }
        }
    }
}

fn share_of(total_memory: u64) -> u64 {
    (total_memory as f64 * DEFAULT_MEMORY_SHARE) as u64
}
