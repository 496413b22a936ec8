use std::collections::BTreeSet;

use bitcoin::{Block, hashes::Hash};
use tracing::{debug, info};

use crate::{
    error::Error,
    storage::{
        encdec::prefix_key_range,
        kv_store::{IndexingTask, Reader},
        table::Table,
    },
    tables::{
        address_filter::AddressFilter,
        hash_by_height::HashByHeightKV,
        types::{AddressKey, WalletId},
        wallet_address::AddressWalletMapKV,
        wallet_txid::{WalletTxidKV, WalletTxidKey},
        wallet_utxo::{OutpointKey, OutpointWalletsKV, WalletUtxo, WalletUtxoKey},
    },
};

use super::{BlockHeight, Point};

const MIN_WATCHED_CAPACITY: usize = 100_000;
const WATCHED_FPR: f64 = 0.001;

/// In memory prefilter over every address imported by any wallet. Checked before the
/// AddressWalletMap lookup for each output of each block.
pub struct WatchedAddresses {
    filter: AddressFilter,
}

impl WatchedAddresses {
    pub fn empty() -> Self {
        Self {
            filter: AddressFilter::with_rate(MIN_WATCHED_CAPACITY, WATCHED_FPR),
        }
    }

    /// Build from the addresses in the reverse index
    pub fn load(reader: &Reader) -> Result<Self, Error> {
        let range = prefix_key_range(&[AddressWalletMapKV::TABLE_ID]);

        let addresses = reader
            .iter_kvs::<AddressWalletMapKV>(range, false)
            .map(|kv| kv.map(|(address, _)| address))
            .collect::<Result<Vec<_>, _>>()?;

        let capacity = (addresses.len() * 2).max(MIN_WATCHED_CAPACITY);
        let mut filter = AddressFilter::with_rate(capacity, WATCHED_FPR);

        for address in addresses.iter() {
            filter.insert(&address.filter_bytes());
        }

        info!(addresses = addresses.len(), "loaded watched addresses");

        Ok(Self { filter })
    }

    pub fn insert(&mut self, address: &AddressKey) {
        self.filter.insert(&address.filter_bytes())
    }

    pub fn may_contain(&self, address: &AddressKey) -> bool {
        self.filter.contains(&address.filter_bytes())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub utxos_created: usize,
    pub utxos_spent: usize,
    pub wallet_txs: usize,
}

/// Apply the effects of a connected block on every watched wallet, and record it as the tip
pub fn apply_block(
    task: &mut IndexingTask,
    block: &Block,
    height: BlockHeight,
    watched: &WatchedAddresses,
) -> Result<(Point, BlockStats), Error> {
    let mut stats = BlockStats::default();

    for (block_index, tx) in block.txdata.iter().enumerate() {
        let txid = tx.compute_txid().to_byte_array();
        let mut touched = BTreeSet::<WalletId>::new();

        for (vout, output) in tx.output.iter().enumerate() {
            let Some(address) = AddressKey::from_script(&output.script_pubkey) else {
                continue;
            };

            if !watched.may_contain(&address) {
                continue;
            }

            let Some(owners) = task.get::<AddressWalletMapKV>(&address)? else {
                continue;
            };

            for wallet in owners.iter() {
                WalletUtxo {
                    wallet: *wallet,
                    txid,
                    vout: vout as u32,
                    height,
                    satoshis: output.value.to_sat(),
                    address,
                }
                .insert(task)?;

                stats.utxos_created += 1;
                touched.insert(*wallet);
            }
        }

        if !tx.is_coinbase() {
            for input in tx.input.iter() {
                let outpoint = OutpointKey {
                    txid: input.previous_output.txid.to_byte_array(),
                    vout: input.previous_output.vout,
                };

                let Some(owners) = task.get::<OutpointWalletsKV>(&outpoint)? else {
                    continue;
                };

                for wallet in owners.iter() {
                    let key = WalletUtxoKey {
                        wallet: *wallet,
                        txid: outpoint.txid,
                        vout: outpoint.vout,
                    };

                    if WalletUtxo::remove(task, &key)?.is_some() {
                        stats.utxos_spent += 1;
                    }

                    touched.insert(*wallet);
                }

                task.delete::<OutpointWalletsKV>(outpoint)?;
            }
        }

        for wallet in touched {
            let key = WalletTxidKey {
                wallet,
                height,
                index: block_index as u32,
            };

            task.set::<WalletTxidKV>(key, txid)?;
            stats.wallet_txs += 1;
        }
    }

    let point = Point {
        height,
        hash: block.block_hash(),
    };

    task.set::<HashByHeightKV>(height, point.hash.to_byte_array())?;

    debug!(%point, ?stats, "applied block");

    Ok((point, stats))
}
