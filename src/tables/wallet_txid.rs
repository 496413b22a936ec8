use wallet_symphony_macros::{Decode, Encode};

use crate::{define_table, sync::BlockHeight};

use super::{
    TableId,
    types::{TxHash, WalletId},
};

define_table! {
    name: WalletTxidKV,
    key_type: WalletTxidKey,
    value_type: TxHash,
    table: TableId::WalletTxid
}

/// Position in a wallet's history, ordered oldest first
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WalletTxidKey {
    pub wallet: WalletId,
    pub height: BlockHeight,
    pub index: u32,
}
