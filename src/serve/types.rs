use bitcoin::{Txid, hashes::Hash};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    sync::{Network, Point},
    tables::{
        wallet_transaction::{WalletTransaction, WalletTransactionJson},
        wallet_utxo::WalletUtxo,
    },
    wallet::{pagination::Position, utxos::UtxoOrder},
};

// -- core types

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainTip {
    /// The hash of the block
    pub block_hash: String,

    /// The height of the block in the blockchain
    pub block_height: u64,
}

impl From<Point> for ChainTip {
    fn from(point: Point) -> Self {
        Self {
            block_hash: point.hash.to_string(),
            block_height: point.height.into(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RangeParams {
    /// Defaults to the indexed chain height
    pub height: Option<u32>,
    /// Defaults to the newest entry at `height`
    pub index: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
pub struct UtxoParams {
    #[serde(default)]
    pub sort: UtxoOrder,
}

// -- endpoint types

#[derive(Serialize, ToSchema)]
pub struct IndexerInfo {
    pub version: String,
    pub network: Network,
    pub started_at: String,
    /// Last block applied to the index, absent before the first one
    pub chain_tip: Option<ChainTip>,
}

#[derive(Serialize, ToSchema)]
pub struct Balance {
    /// Sum of the wallet's unspent outputs, in satoshis
    pub balance: u64,
}

#[derive(Serialize, ToSchema)]
pub struct TxidPage {
    /// Newest first
    pub txids: Vec<String>,
    pub start: Position,
    /// Present when the page is full, pass its predecessor as the next start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

#[derive(Serialize, ToSchema)]
pub struct TransactionPage {
    #[schema(value_type = Vec<WalletTransactionJson>)]
    pub transactions: Vec<WalletTransaction>,
    pub start: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

/// One line of the raw transaction stream
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RawTransactionLine {
    pub txid: String,
    pub hex: String,
}

#[derive(Serialize, ToSchema)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub height: u32,
    pub satoshis: u64,
    pub address: String,
}

impl Utxo {
    pub fn new(utxo: &WalletUtxo, network: Network) -> Self {
        Self {
            txid: Txid::from_byte_array(utxo.txid).to_string(),
            vout: utxo.vout,
            height: utxo.height,
            satoshis: utxo.satoshis,
            address: utxo.address.to_address(network.into()).to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CreatedWallet {
    pub wallet_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct ImportedAddress {
    pub address: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ImportAddressesRequest {
    pub addresses: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ImportedAddresses {
    /// Address -> whether it was newly imported
    #[schema(value_type = Object)]
    pub addresses: IndexMap<String, bool>,
}
