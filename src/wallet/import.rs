use std::sync::Arc;

use bitcoin::{Txid, hashes::Hash};
use tracing::debug;

use crate::{
    error::Error,
    rpc::{ChainSource, TransactionCache},
    storage::{
        kv_store::{Reader, StorageHandler},
        table::Table,
    },
    sync::Network,
    tables::{
        types::{AddressKey, WalletId},
        wallet::{Wallet, WalletKV},
        wallet_address::{WalletAddressKV, WalletAddressKey},
        wallet_transaction::{Category, WalletTransaction, WalletTransactionKV},
    },
    writer::{TaskSubmitter, tasks::WriterMethod},
};

/// A transaction turned into the ledger entries of one wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub entries: Vec<WalletTransaction>,
    pub confirmations: u32,
}

struct Leg {
    index: u32,
    address: Option<AddressKey>,
    satoshis: u64,
    mine: bool,
}

/// Resolves wallet transactions from the store, fetching and transforming the raw
/// transaction on a miss. Entries deep enough to survive a reorg are handed to the writer.
#[derive(Clone)]
pub struct TransactionImporter {
    db: StorageHandler,
    source: Arc<dyn ChainSource>,
    cache: TransactionCache,
    submitter: Arc<dyn TaskSubmitter>,
    network: Network,
    safe_confirmations: u32,
}

impl TransactionImporter {
    pub fn new(
        db: StorageHandler,
        source: Arc<dyn ChainSource>,
        submitter: Arc<dyn TaskSubmitter>,
        network: Network,
        safe_confirmations: u32,
    ) -> Self {
        Self {
            db,
            source,
            cache: TransactionCache::new(),
            submitter,
            network,
            safe_confirmations,
        }
    }

    /// Stored entries for the wallet and transaction, if any
    pub fn cached(&self, wallet: &WalletId, txid: &Txid) -> Result<Vec<WalletTransaction>, Error> {
        let reader = self.db.reader()?;
        let range = WalletTransactionKV::prefix_range(&(*wallet, txid.to_byte_array()));

        reader
            .iter_kvs::<WalletTransactionKV>(range, false)
            .map(|kv| kv.map(|(k, v)| WalletTransaction::from_kv(k, v)))
            .collect()
    }

    /// Entries of `txid` for `wallet`, from the store or else imported
    pub async fn wallet_transactions(
        &self,
        wallet: WalletId,
        txid: Txid,
    ) -> Result<Vec<WalletTransaction>, Error> {
        let cached = self.cached(&wallet, &txid)?;

        if !cached.is_empty() {
            return Ok(cached);
        }

        self.import(wallet, txid).await
    }

    /// Fetch and transform `txid`, persisting the result through the writer when it has at
    /// least the configured number of confirmations. Unconfirmed transactions are never
    /// persisted, whatever the threshold.
    pub async fn import(&self, wallet: WalletId, txid: Txid) -> Result<Vec<WalletTransaction>, Error> {
        let this = self.clone();

        let transformed = tokio::task::spawn_blocking(move || this.transform(wallet, &txid))
            .await
            .map_err(Error::custom)??;

        let Transformed {
            entries,
            confirmations,
        } = transformed;

        if confirmations >= self.safe_confirmations.max(1) && !entries.is_empty() {
            debug!(%wallet, %txid, confirmations, "persisting wallet transaction");

            let method = WriterMethod::SaveTransaction {
                wallet,
                transactions: entries.clone(),
            };
            let priority = method.priority();

            self.submitter.submit(method, priority).await?;
        }

        Ok(entries)
    }

    /// Serialized transaction as the node returns it
    pub async fn raw_hex(&self, txid: Txid) -> Result<String, Error> {
        let source = self.source.clone();

        let hex = tokio::task::spawn_blocking(move || source.raw_transaction_hex(&txid))
            .await
            .map_err(Error::custom)??;

        Ok(hex)
    }

    /// Blocking: fetches the transaction and the outputs its inputs spend
    pub fn transform(&self, wallet: WalletId, txid: &Txid) -> Result<Transformed, Error> {
        let reader = self.db.reader()?;

        let record = reader
            .get::<WalletKV>(&wallet)?
            .ok_or_else(|| Error::not_found(format!("wallet {wallet}")))?;

        let raw = self.cache.get_or_fetch(txid, &self.source)?;
        // mempool transactions get height 0, `import` never stores them
        let height = raw.block_height.unwrap_or_default();

        let is_mine = |address: &Option<AddressKey>| -> Result<bool, Error> {
            match address {
                Some(address) => owns(&reader, &record, wallet, address),
                None => Ok(false),
            }
        };

        let mut outputs = vec![];

        for (vout, output) in raw.tx.output.iter().enumerate() {
            let address = AddressKey::from_script(&output.script_pubkey);

            outputs.push(Leg {
                index: vout as u32,
                mine: is_mine(&address)?,
                address,
                satoshis: output.value.to_sat(),
            });
        }

        let mut inputs = vec![];

        if !raw.tx.is_coinbase() {
            for (index, input) in raw.tx.input.iter().enumerate() {
                let outpoint = input.previous_output;
                let prev = self.cache.get_or_fetch(&outpoint.txid, &self.source)?;

                let spent = prev
                    .tx
                    .output
                    .get(outpoint.vout as usize)
                    .ok_or_else(|| Error::not_found(format!("output {outpoint}")))?;

                let address = AddressKey::from_script(&spent.script_pubkey);

                inputs.push(Leg {
                    index: index as u32,
                    mine: is_mine(&address)?,
                    address,
                    satoshis: spent.value.to_sat(),
                });
            }
        }

        let entries = categorize(&outputs, &inputs)
            .into_iter()
            .map(|(category, index, address, satoshis)| {
                WalletTransaction::from_parts(
                    self.network,
                    address,
                    wallet,
                    *txid,
                    height,
                    category,
                    index,
                    satoshis,
                )
            })
            .collect();

        Ok(Transformed {
            entries,
            confirmations: raw.confirmations,
        })
    }
}

/// Membership filter first, the definitive lookup only on a hit
fn owns(
    reader: &Reader,
    record: &Wallet,
    wallet: WalletId,
    address: &AddressKey,
) -> Result<bool, Error> {
    if !record.filter.contains(&address.filter_bytes()) {
        return Ok(false);
    }

    reader.exists::<WalletAddressKV>(&WalletAddressKey {
        wallet,
        address: *address,
    })
}

fn categorize(outputs: &[Leg], inputs: &[Leg]) -> Vec<(Category, u32, AddressKey, u64)> {
    let inputs_mine = inputs.iter().any(|l| l.mine);
    let outputs_mine = outputs.iter().any(|l| l.mine);

    let mut entries = vec![];

    for leg in outputs.iter().filter(|l| l.mine) {
        let category = if inputs_mine {
            Category::SharedReceive
        } else {
            Category::Receive
        };

        if let Some(address) = leg.address {
            entries.push((category, leg.index, address, leg.satoshis));
        }
    }

    for leg in inputs.iter().filter(|l| l.mine) {
        let category = if outputs_mine {
            Category::SharedSend
        } else {
            Category::Send
        };

        if let Some(address) = leg.address {
            entries.push((category, leg.index, address, leg.satoshis));
        }
    }

    // only a wallet funding every input paid the fee
    if !inputs.is_empty() && inputs.iter().all(|l| l.mine) {
        let spent: u64 = inputs.iter().map(|l| l.satoshis).sum();
        let created: u64 = outputs.iter().map(|l| l.satoshis).sum();

        if let Some(address) = inputs[0].address {
            entries.push((Category::Fee, 0, address, spent.saturating_sub(created)));
        }
    }

    entries
}
