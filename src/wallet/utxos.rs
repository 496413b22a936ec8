use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::Error,
    storage::{kv_store::Reader, table::Table},
    tables::{
        types::WalletId,
        wallet::WalletKV,
        wallet_utxo::{
            WalletUtxo, WalletUtxoByHeightKV, WalletUtxoBySatoshisKV, WalletUtxoKV, WalletUtxoKey,
        },
    },
};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UtxoOrder {
    /// Oldest confirmation first
    #[default]
    Height,
    /// Smallest value first
    Satoshis,
}

pub fn require_wallet(reader: &Reader, wallet: &WalletId) -> Result<(), Error> {
    if reader.exists::<WalletKV>(wallet)? {
        Ok(())
    } else {
        Err(Error::not_found(format!("wallet {wallet}")))
    }
}

/// Total value of the wallet's unspent outputs
pub fn balance(reader: &Reader, wallet: &WalletId) -> Result<u64, Error> {
    require_wallet(reader, wallet)?;

    reader
        .iter_kvs::<WalletUtxoKV>(WalletUtxoKV::prefix_range(wallet), false)
        .try_fold(0u64, |total, kv| {
            let (_, value) = kv?;
            Ok(total.saturating_add(value.satoshis))
        })
}

/// The wallet's unspent outputs, enumerated through the secondary index matching `order`
pub fn list_utxos(
    reader: &Reader,
    wallet: &WalletId,
    order: UtxoOrder,
) -> Result<Vec<WalletUtxo>, Error> {
    require_wallet(reader, wallet)?;

    let keys = match order {
        UtxoOrder::Height => {
            let range = WalletUtxoByHeightKV::prefix_range(wallet);

            reader
                .iter_kvs::<WalletUtxoByHeightKV>(range, false)
                .map(|kv| kv.map(|(k, _)| (k.wallet, k.txid, k.vout)))
                .collect::<Result<Vec<_>, _>>()?
        }
        UtxoOrder::Satoshis => {
            let range = WalletUtxoBySatoshisKV::prefix_range(wallet);

            reader
                .iter_kvs::<WalletUtxoBySatoshisKV>(range, false)
                .map(|kv| kv.map(|(k, _)| (k.wallet, k.txid, k.vout)))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    keys.into_iter()
        .map(|(wallet, txid, vout)| {
            let key = WalletUtxoKey { wallet, txid, vout };

            // the views are written together, a missing record is a broken index
            let value = reader.get::<WalletUtxoKV>(&key)?.ok_or_else(|| {
                Error::custom(format!(
                    "utxo view without record: {}:{}",
                    hex::encode(txid),
                    vout
                ))
            })?;

            Ok(WalletUtxo::from_kv(key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::kv_store::tests::temp_store,
        tables::{
            types::{AddressKey, AddressType},
            wallet::Wallet,
        },
    };

    fn utxo(wallet: WalletId, tag: u8, height: u32, satoshis: u64) -> WalletUtxo {
        WalletUtxo {
            wallet,
            txid: [tag; 32],
            vout: 0,
            height,
            satoshis,
            address: AddressKey {
                kind: AddressType::PubKeyHash,
                hash160: [1; 20],
            },
        }
    }

    #[test]
    fn balance_and_orderings() {
        let (_dir, store) = temp_store();
        let wallet = WalletId([5; 32]);
        let other = WalletId([6; 32]);

        let mut task = store.begin_indexing_task(false).unwrap();
        task.set::<WalletKV>(wallet, Wallet::new()).unwrap();
        task.set::<WalletKV>(other, Wallet::new()).unwrap();

        utxo(wallet, 1, 30, 700).insert(&mut task).unwrap();
        utxo(wallet, 2, 10, 9_000).insert(&mut task).unwrap();
        utxo(wallet, 3, 20, 50).insert(&mut task).unwrap();
        utxo(other, 4, 1, 1_000_000).insert(&mut task).unwrap();

        store.apply_indexing_task(task.finalize(), None, 0).unwrap();

        let reader = store.reader().unwrap();

        assert_eq!(balance(&reader, &wallet).unwrap(), 9_750);

        let by_height = list_utxos(&reader, &wallet, UtxoOrder::Height).unwrap();
        assert_eq!(
            by_height.iter().map(|u| u.height).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );

        let by_value = list_utxos(&reader, &wallet, UtxoOrder::Satoshis).unwrap();
        assert_eq!(
            by_value.iter().map(|u| u.satoshis).collect::<Vec<_>>(),
            vec![50, 700, 9_000]
        );
    }

    #[test]
    fn unknown_wallet_is_not_found() {
        let (_dir, store) = temp_store();
        let reader = store.reader().unwrap();

        assert!(matches!(
            balance(&reader, &WalletId([1; 32])),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            list_utxos(&reader, &WalletId([1; 32]), UtxoOrder::Height),
            Err(Error::NotFound(_))
        ));
    }
}
