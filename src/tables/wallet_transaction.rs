use std::str::FromStr;

use bitcoin::{Txid, hashes::Hash};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use wallet_symphony_macros::{Decode, Encode};

use crate::{
    define_table,
    error::ValidationError,
    sync::{BlockHeight, Network},
};

use super::{
    TableId,
    types::{AddressKey, TxHash, WalletId},
};

// walletId(32) ‖ txid(32) ‖ category(1) ‖ index(4)
//   -> network(1) ‖ addressType(1) ‖ hash160(20) ‖ height(4) ‖ satoshis(8)
define_table! {
    name: WalletTransactionKV,
    key_type: WalletTransactionKey,
    value_type: WalletTransactionValue,
    table: TableId::WalletTransaction
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WalletTransactionKey {
    pub wallet: WalletId,
    pub txid: TxHash,
    pub category: Category,
    pub index: u32,
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug)]
pub struct WalletTransactionValue {
    pub network: Network,
    pub address: AddressKey,
    pub height: BlockHeight,
    pub satoshis: u64,
}

/// How a transaction moved value relative to a wallet
#[derive(
    Encode, Decode, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, ToSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Receive,
    SharedReceive,
    Send,
    SharedSend,
    Fee,
}

impl Category {
    pub fn is_receiving(&self) -> bool {
        matches!(self, Self::Receive | Self::SharedReceive)
    }
}

/// Wallet scoped ledger entry for one leg of a transaction.
///
/// `index` is the output index for receiving legs and the input index otherwise. Values are
/// checked when constructed, including when deserialized, so a stored entry is always valid.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "WalletTransactionJson", into = "WalletTransactionJson")]
pub struct WalletTransaction {
    network: Network,
    address: AddressKey,
    wallet: WalletId,
    txid: Txid,
    block_height: BlockHeight,
    category: Category,
    index: u32,
    satoshis: u64,
}

/// Wire form of a wallet transaction
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransactionJson {
    pub network: Network,
    pub address: String,
    #[schema(value_type = String)]
    pub wallet_id: WalletId,
    pub txid: String,
    pub block_height: i64,
    pub receiving: bool,
    pub category: Category,
    pub index: u32,
    pub satoshis: u64,
}

impl WalletTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: Network,
        address: &str,
        wallet: WalletId,
        txid: &str,
        block_height: i64,
        category: Category,
        index: u32,
        satoshis: u64,
    ) -> Result<Self, ValidationError> {
        if txid.len() != 64 {
            return Err(ValidationError::InvalidTxid(txid.to_string()));
        }

        let txid =
            Txid::from_str(txid).map_err(|_| ValidationError::InvalidTxid(txid.to_string()))?;

        let block_height = BlockHeight::try_from(block_height)
            .map_err(|_| ValidationError::InvalidHeight(block_height.to_string()))?;

        let address = AddressKey::parse(address, network.into())?;

        Ok(Self {
            network,
            address,
            wallet,
            txid,
            block_height,
            category,
            index,
            satoshis,
        })
    }

    /// Build from already validated parts, as produced by the transaction transform
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        network: Network,
        address: AddressKey,
        wallet: WalletId,
        txid: Txid,
        block_height: BlockHeight,
        category: Category,
        index: u32,
        satoshis: u64,
    ) -> Self {
        Self {
            network,
            address,
            wallet,
            txid,
            block_height,
            category,
            index,
            satoshis,
        }
    }

    pub fn from_kv(key: WalletTransactionKey, value: WalletTransactionValue) -> Self {
        Self {
            network: value.network,
            address: value.address,
            wallet: key.wallet,
            txid: Txid::from_byte_array(key.txid),
            block_height: value.height,
            category: key.category,
            index: key.index,
            satoshis: value.satoshis,
        }
    }

    pub fn to_kv(&self) -> (WalletTransactionKey, WalletTransactionValue) {
        (
            WalletTransactionKey {
                wallet: self.wallet,
                txid: self.txid.to_byte_array(),
                category: self.category,
                index: self.index,
            },
            WalletTransactionValue {
                network: self.network,
                address: self.address,
                height: self.block_height,
                satoshis: self.satoshis,
            },
        )
    }

    pub fn wallet(&self) -> WalletId {
        self.wallet
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn block_height(&self) -> BlockHeight {
        self.block_height
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn receiving(&self) -> bool {
        self.category.is_receiving()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn satoshis(&self) -> u64 {
        self.satoshis
    }

    pub fn address(&self) -> AddressKey {
        self.address
    }
}

impl TryFrom<WalletTransactionJson> for WalletTransaction {
    type Error = ValidationError;

    fn try_from(json: WalletTransactionJson) -> Result<Self, Self::Error> {
        if json.receiving != json.category.is_receiving() {
            return Err(ValidationError::InvalidParam(format!(
                "receiving flag does not match category {:?}",
                json.category
            )));
        }

        Self::new(
            json.network,
            &json.address,
            json.wallet_id,
            &json.txid,
            json.block_height,
            json.category,
            json.index,
            json.satoshis,
        )
    }
}

impl From<WalletTransaction> for WalletTransactionJson {
    fn from(tx: WalletTransaction) -> Self {
        Self {
            network: tx.network,
            address: tx.address.to_address(tx.network.into()).to_string(),
            wallet_id: tx.wallet,
            txid: tx.txid.to_string(),
            block_height: tx.block_height as i64,
            receiving: tx.receiving(),
            category: tx.category,
            index: tx.index,
            satoshis: tx.satoshis,
        }
    }
}
