use std::{sync::Arc, time::Duration};

use bitcoin::{Block, BlockHash, Transaction, Txid};
use mini_moka::sync::Cache;
use serde::Deserialize;
use thiserror::Error;

pub mod bitcoind;
pub mod pool;

pub use bitcoind::NodeRpcConfig;
pub use pool::RpcPool;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Redundant endpoints of the same node, or of nodes following the same chain
    #[serde(default)]
    pub rpc: Vec<NodeRpcConfig>,

    pub max_attempts: Option<u32>,

    pub retry_delay_ms: Option<u64>,
}

impl Config {
    /// Connect to every configured endpoint
    pub fn pool(&self) -> Result<RpcPool<bitcoincore_rpc::Client>, RpcError> {
        if self.rpc.is_empty() {
            return Err(RpcError::new("no node rpc endpoints configured"));
        }

        let clients = self
            .rpc
            .iter()
            .map(NodeRpcConfig::connect)
            .collect::<Result<Vec<_>, _>>()?;

        let retry_delay = self
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(pool::DEFAULT_RETRY_DELAY);

        Ok(RpcPool::new(
            clients,
            self.max_attempts.unwrap_or(pool::DEFAULT_MAX_ATTEMPTS),
            retry_delay,
        ))
    }
}

/// Failure reported by (or while talking to) a full node, keeping the node's error code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code: {code:?})")]
pub struct RpcError {
    pub code: Option<i32>,
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl ToString) -> Self {
        Self {
            code: None,
            message: message.to_string(),
        }
    }

    pub fn with_code(code: i32, message: impl ToString) -> Self {
        Self {
            code: Some(code),
            message: message.to_string(),
        }
    }
}

/// A transaction with its position relative to the node's best chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub tx: Transaction,
    /// 0 while in the mempool
    pub confirmations: u32,
    pub block_height: Option<u32>,
}

/// Entry of `getaddressdeltas` (addressindex)
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddressDelta {
    pub address: String,
    pub txid: Txid,
    /// output index for credits, input index for debits
    pub index: u32,
    pub satoshis: i64,
    #[serde(rename = "blockindex")]
    pub block_index: u32,
    pub height: u32,
}

/// Entry of `getaddressutxos` (addressindex)
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    pub txid: Txid,
    pub output_index: u32,
    pub script: String,
    pub satoshis: u64,
    pub height: u32,
}

/// Blocking access to the authoritative chain
pub trait ChainSource: Send + Sync {
    /// Height of the node's best block
    fn chain_height(&self) -> Result<u32, RpcError>;

    fn block_hash(&self, height: u32) -> Result<BlockHash, RpcError>;

    fn raw_block(&self, height: u32) -> Result<Block, RpcError>;

    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError>;

    fn raw_transaction_hex(&self, txid: &Txid) -> Result<String, RpcError>;

    /// Balance changes of `addresses` within the inclusive height range
    fn address_deltas(
        &self,
        addresses: &[String],
        start: u32,
        end: u32,
    ) -> Result<Vec<AddressDelta>, RpcError>;

    fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError>;
}

impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    fn chain_height(&self) -> Result<u32, RpcError> {
        (**self).chain_height()
    }

    fn block_hash(&self, height: u32) -> Result<BlockHash, RpcError> {
        (**self).block_hash(height)
    }

    fn raw_block(&self, height: u32) -> Result<Block, RpcError> {
        (**self).raw_block(height)
    }

    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        (**self).raw_transaction(txid)
    }

    fn raw_transaction_hex(&self, txid: &Txid) -> Result<String, RpcError> {
        (**self).raw_transaction_hex(txid)
    }

    fn address_deltas(
        &self,
        addresses: &[String],
        start: u32,
        end: u32,
    ) -> Result<Vec<AddressDelta>, RpcError> {
        (**self).address_deltas(addresses, start, end)
    }

    fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        (**self).address_utxos(addresses)
    }
}

const TX_CACHE_CAPACITY: u64 = 10_000;
const TX_CACHE_TTL: Duration = Duration::from_secs(30);

/// Short lived cache of fetched transactions, so paging through history does not refetch the
/// same unconfirmed transactions over and over
#[derive(Clone)]
pub struct TransactionCache {
    cache: Cache<Txid, Arc<RawTransaction>>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(TX_CACHE_CAPACITY)
                .time_to_live(TX_CACHE_TTL)
                .build(),
        }
    }

    pub fn get_or_fetch(
        &self,
        txid: &Txid,
        source: &impl ChainSource,
    ) -> Result<Arc<RawTransaction>, RpcError> {
        if let Some(hit) = self.cache.get(txid) {
            return Ok(hit);
        }

        let fetched = Arc::new(source.raw_transaction(txid)?);
        self.cache.insert(*txid, fetched.clone());

        Ok(fetched)
    }
}

impl Default for TransactionCache {
    fn default() -> Self {
        Self::new()
    }
}
