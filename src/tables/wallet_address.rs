use wallet_symphony_macros::{Decode, Encode};

use crate::define_table;

use super::{
    TableId,
    types::{AddressKey, WalletIds, WalletId},
};

define_table! {
    name: WalletAddressKV,
    key_type: WalletAddressKey,
    value_type: (),
    table: TableId::WalletAddress
}

// walletId(32) ‖ addressType(1) ‖ hash160(20)
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WalletAddressKey {
    pub wallet: WalletId,
    pub address: AddressKey,
}

// reverse index, addressType(1) ‖ hash160(20) -> walletIds
define_table! {
    name: AddressWalletMapKV,
    key_type: AddressKey,
    value_type: WalletIds,
    table: TableId::AddressWalletMap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::{
            encdec::{Decode, Encode},
            table::Table,
        },
        tables::types::AddressType,
    };

    fn address(kind: AddressType, byte: u8) -> AddressKey {
        AddressKey {
            kind,
            hash160: [byte; 20],
        }
    }

    #[test]
    fn wallet_address_keys_at_the_extremes() {
        for (wallet, addr) in [
            (WalletId([0; 32]), address(AddressType::PubKeyHash, 0)),
            (WalletId([0xff; 32]), address(AddressType::ScriptHash, 0xff)),
        ] {
            let key = WalletAddressKey {
                wallet,
                address: addr,
            };

            let raw = WalletAddressKV::encode_key(&key);

            assert_eq!(raw.len(), 1 + 32 + 21);
            assert_eq!(raw[0], TableId::WalletAddress as u8);
            assert_eq!(WalletAddressKV::decode_key(&raw).unwrap(), key);
        }
    }

    #[test]
    fn wallet_lists_keep_their_order() {
        let ids = WalletIds(vec![WalletId([0xff; 32]), WalletId([0; 32])]);

        let raw = ids.encode();

        assert_eq!(raw.len(), 64);
        assert_eq!(WalletIds::decode_exact(&raw).unwrap(), ids);
        assert_eq!(WalletIds::decode_exact(&[]).unwrap(), WalletIds::default());

        // a torn id is rejected rather than silently dropped
        assert!(WalletIds::decode_exact(&raw[..63]).is_err());

        let key = address(AddressType::ScriptHash, 0xff);
        let raw = AddressWalletMapKV::encode_key(&key);

        assert_eq!(AddressWalletMapKV::decode_key(&raw).unwrap(), key);
    }
}
