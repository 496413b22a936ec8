use wallet_symphony_macros::{Decode, Encode};

use crate::define_table;

use super::{TableId, address_filter::AddressFilter, types::WalletId};

define_table! {
    name: WalletKV,
    key_type: WalletId,
    value_type: Wallet,
    table: TableId::Wallet
}

/// A wallet exists exactly when this record does
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct Wallet {
    pub address_count: u32,
    pub filter: AddressFilter,
}

impl Wallet {
    pub fn new() -> Self {
        Self {
            address_count: 0,
            filter: AddressFilter::for_wallet(),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
