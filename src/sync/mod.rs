use std::fmt;

use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use wallet_symphony_macros::{Decode, Encode};

pub mod engine;
pub mod indexer;
pub mod tip;

pub type BlockHeight = u32;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_ROLLBACK: u32 = 100;
const DEFAULT_HISTORY_CHUNK_SIZE: u32 = 100_000;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// How often to ask the node for its tip
    pub poll_interval_secs: Option<u64>,

    /// Number of blocks of rollback data to keep, bounds the depth of a reorg we can handle
    pub max_rollback: Option<u32>,

    /// Height range size used when fetching the history of newly imported addresses
    pub history_chunk_size: Option<u32>,

    /// Block to take as the base of an empty index (default: the node's tip at first start).
    /// Blocks below it are never applied, history for them comes from address imports.
    pub start_height: Option<u32>,
}

impl Config {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn max_rollback(&self) -> u32 {
        self.max_rollback.unwrap_or(DEFAULT_MAX_ROLLBACK)
    }

    pub fn history_chunk_size(&self) -> u32 {
        self.history_chunk_size
            .unwrap_or(DEFAULT_HISTORY_CHUNK_SIZE)
            .max(1)
    }
}

#[derive(
    Deserialize, Serialize, Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet4,
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet4 => bitcoin::Network::Testnet4,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// A block in the locally indexed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub height: BlockHeight,
    pub hash: BlockHash,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.height, self.hash)
    }
}
