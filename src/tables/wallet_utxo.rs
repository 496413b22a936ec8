use wallet_symphony_macros::{Decode, Encode};

use crate::{
    define_table, error::Error, storage::kv_store::IndexingTask, sync::BlockHeight,
};

use super::{
    TableId,
    types::{AddressKey, TxHash, WalletId},
};

// Canonical record, walletId(32) ‖ txid(32) ‖ vout(4) -> height(4) ‖ satoshis(8) ‖ address(21)
define_table! {
    name: WalletUtxoKV,
    key_type: WalletUtxoKey,
    value_type: WalletUtxoValue,
    table: TableId::WalletUtxo
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WalletUtxoKey {
    pub wallet: WalletId,
    pub txid: TxHash,
    pub vout: u32,
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug)]
pub struct WalletUtxoValue {
    pub height: BlockHeight,
    pub satoshis: u64,
    pub address: AddressKey,
}

define_table! {
    name: WalletUtxoByHeightKV,
    key_type: WalletUtxoByHeightKey,
    value_type: (),
    table: TableId::WalletUtxoByHeight
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WalletUtxoByHeightKey {
    pub wallet: WalletId,
    pub height: BlockHeight,
    pub txid: TxHash,
    pub vout: u32,
}

define_table! {
    name: WalletUtxoBySatoshisKV,
    key_type: WalletUtxoBySatoshisKey,
    value_type: (),
    table: TableId::WalletUtxoBySatoshis
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WalletUtxoBySatoshisKey {
    pub wallet: WalletId,
    pub satoshis: u64,
    pub txid: TxHash,
    pub vout: u32,
}

// Which wallets own an unspent output, txid(32) ‖ vout(4) -> walletIds
define_table! {
    name: OutpointWalletsKV,
    key_type: OutpointKey,
    value_type: super::types::WalletIds,
    table: TableId::OutpointWallets
}

#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutpointKey {
    pub txid: TxHash,
    pub vout: u32,
}

/// One logical wallet UTXO, stored under three keys which are only ever written together
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WalletUtxo {
    pub wallet: WalletId,
    pub txid: TxHash,
    pub vout: u32,
    pub height: BlockHeight,
    pub satoshis: u64,
    pub address: AddressKey,
}

impl WalletUtxo {
    pub fn from_kv(key: WalletUtxoKey, value: WalletUtxoValue) -> Self {
        Self {
            wallet: key.wallet,
            txid: key.txid,
            vout: key.vout,
            height: value.height,
            satoshis: value.satoshis,
            address: value.address,
        }
    }

    pub fn key(&self) -> WalletUtxoKey {
        WalletUtxoKey {
            wallet: self.wallet,
            txid: self.txid,
            vout: self.vout,
        }
    }

    fn by_height_key(&self) -> WalletUtxoByHeightKey {
        WalletUtxoByHeightKey {
            wallet: self.wallet,
            height: self.height,
            txid: self.txid,
            vout: self.vout,
        }
    }

    fn by_satoshis_key(&self) -> WalletUtxoBySatoshisKey {
        WalletUtxoBySatoshisKey {
            wallet: self.wallet,
            satoshis: self.satoshis,
            txid: self.txid,
            vout: self.vout,
        }
    }

    /// Write all three views, and register the wallet as an owner of the outpoint
    pub fn insert(&self, task: &mut IndexingTask) -> Result<(), Error> {
        task.set::<WalletUtxoKV>(
            self.key(),
            WalletUtxoValue {
                height: self.height,
                satoshis: self.satoshis,
                address: self.address,
            },
        )?;
        task.set::<WalletUtxoByHeightKV>(self.by_height_key(), ())?;
        task.set::<WalletUtxoBySatoshisKV>(self.by_satoshis_key(), ())?;

        let outpoint = OutpointKey {
            txid: self.txid,
            vout: self.vout,
        };

        let mut owners = task.get::<OutpointWalletsKV>(&outpoint)?.unwrap_or_default();

        if owners.insert(self.wallet) {
            task.set::<OutpointWalletsKV>(outpoint, owners)?;
        }

        Ok(())
    }

    /// Remove the wallet's UTXO at `key` from all three views, if it exists. The outpoint
    /// owner list is left to the caller, which usually removes it for every wallet at once.
    pub fn remove(task: &mut IndexingTask, key: &WalletUtxoKey) -> Result<Option<Self>, Error> {
        let Some(value) = task.get::<WalletUtxoKV>(key)? else {
            return Ok(None);
        };

        let utxo = Self::from_kv(*key, value);

        task.delete::<WalletUtxoKV>(*key)?;
        task.delete::<WalletUtxoByHeightKV>(utxo.by_height_key())?;
        task.delete::<WalletUtxoBySatoshisKV>(utxo.by_satoshis_key())?;

        Ok(Some(utxo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::{
            encdec::{Decode, Encode},
            kv_store::tests::temp_store,
            table::Table,
        },
        tables::types::AddressType,
    };
    use proptest::prelude::*;

    fn utxo(wallet: u8, vout: u32, satoshis: u64) -> WalletUtxo {
        WalletUtxo {
            wallet: WalletId([wallet; 32]),
            txid: [0xaa; 32],
            vout,
            height: 0,
            satoshis,
            address: AddressKey {
                kind: AddressType::ScriptHash,
                hash160: [1; 20],
            },
        }
    }

    #[test]
    fn views_are_written_and_removed_together() {
        let (_dir, store) = temp_store();

        let a = utxo(1, u32::MAX, 0);
        let b = utxo(2, u32::MAX, u64::MAX);

        let mut task = store.begin_indexing_task(false).unwrap();
        a.insert(&mut task).unwrap();
        b.insert(&mut task).unwrap();
        store.apply_indexing_task(task.finalize(), None, 10).unwrap();

        let reader = store.reader().unwrap();
        let value = reader.get::<WalletUtxoKV>(&a.key()).unwrap().unwrap();
        assert_eq!(WalletUtxo::from_kv(a.key(), value), a);
        assert!(reader.exists::<WalletUtxoByHeightKV>(&a.by_height_key()).unwrap());
        assert!(reader.exists::<WalletUtxoBySatoshisKV>(&b.by_satoshis_key()).unwrap());

        let owners = reader
            .get::<OutpointWalletsKV>(&OutpointKey {
                txid: [0xaa; 32],
                vout: u32::MAX,
            })
            .unwrap()
            .unwrap();
        assert_eq!(owners.0, vec![a.wallet, b.wallet]);
        drop(reader);

        let mut task = store.begin_indexing_task(false).unwrap();
        assert_eq!(WalletUtxo::remove(&mut task, &a.key()).unwrap(), Some(a));
        assert_eq!(WalletUtxo::remove(&mut task, &a.key()).unwrap(), None);
        store.apply_indexing_task(task.finalize(), None, 10).unwrap();

        let reader = store.reader().unwrap();
        assert!(!reader.exists::<WalletUtxoKV>(&a.key()).unwrap());
        assert!(!reader.exists::<WalletUtxoByHeightKV>(&a.by_height_key()).unwrap());
        assert!(!reader.exists::<WalletUtxoBySatoshisKV>(&a.by_satoshis_key()).unwrap());
        assert!(reader.exists::<WalletUtxoKV>(&b.key()).unwrap());
    }

    #[test]
    fn satoshi_view_orders_by_value() {
        let low = WalletUtxoBySatoshisKV::encode_key(&utxo(1, 9, 1).by_satoshis_key());
        let high = WalletUtxoBySatoshisKV::encode_key(&utxo(1, 0, 256).by_satoshis_key());

        assert!(low < high);
    }

    proptest! {
        #[test]
        fn satoshi_key_order_matches_value_order(
            a in any::<u64>(),
            b in any::<u64>(),
            vout_a in any::<u32>(),
            vout_b in any::<u32>(),
        ) {
            prop_assume!(a != b);

            let ka = WalletUtxoBySatoshisKV::encode_key(&utxo(1, vout_a, a).by_satoshis_key());
            let kb = WalletUtxoBySatoshisKV::encode_key(&utxo(1, vout_b, b).by_satoshis_key());

            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }

    #[test]
    fn boundary_utxos_survive_encoding() {
        let cases = [(0, 0, 0), (u32::MAX, u64::MAX, u32::MAX), (0, u64::MAX, 0)];

        for (height, satoshis, vout) in cases {
            let u = WalletUtxo {
                height,
                ..utxo(0xff, vout, satoshis)
            };

            let raw = WalletUtxoKV::encode_key(&u.key());
            assert_eq!(raw.len(), 1 + 32 + 32 + 4);
            assert_eq!(WalletUtxoKV::decode_key(&raw).unwrap(), u.key());

            let value = WalletUtxoValue {
                height,
                satoshis,
                address: u.address,
            };
            let raw = value.encode();
            assert_eq!(raw.len(), 4 + 8 + 21);
            assert_eq!(WalletUtxoValue::decode_exact(&raw).unwrap(), value);

            let raw = WalletUtxoByHeightKV::encode_key(&u.by_height_key());
            assert_eq!(raw.len(), 1 + 32 + 4 + 32 + 4);
            assert_eq!(WalletUtxoByHeightKV::decode_key(&raw).unwrap(), u.by_height_key());

            let raw = WalletUtxoBySatoshisKV::encode_key(&u.by_satoshis_key());
            assert_eq!(raw.len(), 1 + 32 + 8 + 32 + 4);
            assert_eq!(
                WalletUtxoBySatoshisKV::decode_key(&raw).unwrap(),
                u.by_satoshis_key()
            );

            let outpoint = OutpointKey {
                txid: u.txid,
                vout,
            };
            let raw = OutpointWalletsKV::encode_key(&outpoint);
            assert_eq!(OutpointWalletsKV::decode_key(&raw).unwrap(), outpoint);
        }
    }

    #[test]
    fn height_view_orders_by_height_first() {
        let early = WalletUtxo {
            height: 0,
            ..utxo(1, u32::MAX, u64::MAX)
        };
        let late = WalletUtxo {
            height: u32::MAX,
            ..utxo(1, 0, 0)
        };

        assert!(
            WalletUtxoByHeightKV::encode_key(&early.by_height_key())
                < WalletUtxoByHeightKV::encode_key(&late.by_height_key())
        );
    }
}
