use std::collections::HashMap;

use bitcoin::hashes::Hash;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{Error, ValidationError},
    rpc::ChainSource,
    storage::kv_store::IndexingTask,
    sync::{BlockHeight, Network, Point, engine::SyncEngine},
    tables::{
        types::{AddressKey, WalletId},
        wallet::{Wallet, WalletKV},
        wallet_address::{AddressWalletMapKV, WalletAddressKV, WalletAddressKey},
        wallet_transaction::{WalletTransaction, WalletTransactionKV},
        wallet_txid::{WalletTxidKV, WalletTxidKey},
        wallet_utxo::WalletUtxo,
    },
};

use super::protocol::{Task, TaskId};

pub const CREATE_WALLET: &str = "createWallet";
pub const IMPORT_ADDRESSES: &str = "importAddresses";
pub const SAVE_TRANSACTION: &str = "saveTransaction";

/// Requests a user is waiting on
pub const HIGH_PRIORITY: i64 = 10;
/// Cache fills
pub const LOW_PRIORITY: i64 = 0;

/// The mutations a reader can ask the writer for
#[derive(Debug, Clone, PartialEq)]
pub enum WriterMethod {
    CreateWallet(WalletId),
    ImportAddresses {
        wallet: WalletId,
        addresses: Vec<String>,
    },
    SaveTransaction {
        wallet: WalletId,
        transactions: Vec<WalletTransaction>,
    },
}

impl WriterMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateWallet(_) => CREATE_WALLET,
            Self::ImportAddresses { .. } => IMPORT_ADDRESSES,
            Self::SaveTransaction { .. } => SAVE_TRANSACTION,
        }
    }

    pub fn priority(&self) -> i64 {
        match self {
            Self::SaveTransaction { .. } => LOW_PRIORITY,
            _ => HIGH_PRIORITY,
        }
    }

    pub fn into_task(self, id: TaskId) -> Result<Task, Error> {
        let method = self.name().to_string();

        let params = match self {
            Self::CreateWallet(wallet) => vec![serde_json::to_value(wallet)?],
            Self::ImportAddresses { wallet, addresses } => {
                vec![serde_json::to_value(wallet)?, serde_json::to_value(addresses)?]
            }
            Self::SaveTransaction {
                wallet,
                transactions,
            } => vec![
                serde_json::to_value(wallet)?,
                serde_json::to_value(transactions)?,
            ],
        };

        Ok(Task { id, method, params })
    }
}

impl TryFrom<&Task> for WriterMethod {
    type Error = Error;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        let params = &task.params;

        match task.method.as_str() {
            CREATE_WALLET => Ok(Self::CreateWallet(param(params, 0, "walletId")?)),
            IMPORT_ADDRESSES => Ok(Self::ImportAddresses {
                wallet: param(params, 0, "walletId")?,
                addresses: param(params, 1, "addresses")?,
            }),
            SAVE_TRANSACTION => Ok(Self::SaveTransaction {
                wallet: param(params, 0, "walletId")?,
                transactions: param(params, 1, "transactions")?,
            }),
            other => Err(Error::Writer(format!("unknown method {other}"))),
        }
    }
}

fn param<T: DeserializeOwned>(params: &[Value], index: usize, name: &str) -> Result<T, Error> {
    let value = params
        .get(index)
        .ok_or_else(|| ValidationError::InvalidParam(format!("missing {name}")))?;

    serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::InvalidParam(format!("{name}: {e}")).into())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CreateWalletResult {
    pub created: bool,
}

/// Address -> whether it was newly imported, in request order
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImportAddressesResult {
    pub addresses: IndexMap<String, bool>,
}

/// Split `[start, end]` into consecutive inclusive sections of at most `size` heights
pub fn split_range(start: u32, end: u32, size: u32) -> Vec<(u32, u32)> {
    let size = size.max(1);
    let mut sections = vec![];
    let mut from = start;

    while from <= end {
        let to = from.saturating_add(size - 1).min(end);
        sections.push((from, to));

        if to == u32::MAX {
            break;
        }

        from = to + 1;
    }

    sections
}

/// Runs writer methods against the store, on the writer's exclusive mutation path
pub struct TaskRunner {
    network: Network,
    history_chunk_size: u32,
}

impl TaskRunner {
    pub fn new(network: Network, history_chunk_size: u32) -> Self {
        Self {
            network,
            history_chunk_size,
        }
    }

    pub fn run<C: ChainSource>(
        &self,
        engine: &mut SyncEngine<C>,
        task: &Task,
    ) -> Result<Value, Error> {
        let method = WriterMethod::try_from(task)?;

        debug!(id = %task.id, method = method.name(), "running task");

        match method {
            WriterMethod::CreateWallet(wallet) => {
                let created = self.create_wallet(engine, wallet)?;
                Ok(serde_json::to_value(CreateWalletResult { created })?)
            }
            WriterMethod::ImportAddresses { wallet, addresses } => {
                let addresses = self.import_addresses(engine, wallet, &addresses)?;
                Ok(serde_json::to_value(ImportAddressesResult { addresses })?)
            }
            WriterMethod::SaveTransaction {
                wallet,
                transactions,
            } => {
                self.save_transactions(engine, wallet, &transactions)?;
                Ok(Value::Null)
            }
        }
    }

    fn create_wallet<C: ChainSource>(
        &self,
        engine: &SyncEngine<C>,
        wallet: WalletId,
    ) -> Result<bool, Error> {
        let db = engine.db();
        let mut task = db.begin_indexing_task(false)?;

        if task.exists::<WalletKV>(&wallet)? {
            return Ok(false);
        }

        task.set::<WalletKV>(wallet, Wallet::new())?;
        db.apply_indexing_task(task.finalize(), None, 0)?;

        info!(%wallet, "created wallet");

        Ok(true)
    }

    fn import_addresses<C: ChainSource>(
        &self,
        engine: &mut SyncEngine<C>,
        wallet: WalletId,
        addresses: &[String],
    ) -> Result<IndexMap<String, bool>, Error> {
        // reject the whole request before touching the store if any address is bad
        let parsed = addresses
            .iter()
            .map(|a| AddressKey::parse(a, self.network.into()).map(|key| (a.clone(), key)))
            .collect::<Result<Vec<_>, _>>()?;

        let tip = engine.local_tip()?;
        let revertible = engine.revertible_blocks()?;
        let db = engine.db();
        let mut task = db.begin_indexing_task(false)?;

        let mut record = task
            .get::<WalletKV>(&wallet)?
            .ok_or_else(|| Error::not_found(format!("wallet {wallet}")))?;

        let mut results = IndexMap::new();
        let mut new = vec![];

        for (address, key) in parsed {
            let wallet_address = WalletAddressKey {
                wallet,
                address: key,
            };

            if task.exists::<WalletAddressKV>(&wallet_address)? {
                results.entry(address).or_insert(false);
                continue;
            }

            task.set::<WalletAddressKV>(wallet_address, ())?;

            let mut owners = task.get::<AddressWalletMapKV>(&key)?.unwrap_or_default();
            owners.insert(wallet);
            task.set::<AddressWalletMapKV>(key, owners)?;

            record.filter.insert(&key.filter_bytes());
            record.address_count += 1;

            results.insert(address.clone(), true);
            new.push((address, key));
        }

        if new.is_empty() {
            return Ok(results);
        }

        task.set::<WalletKV>(wallet, record)?;

        if let Some(tip) = tip {
            let names = new.iter().map(|(a, _)| a.clone()).collect::<Vec<_>>();
            let stats = self.backfill(
                engine.source(),
                &mut task,
                wallet,
                &names,
                tip.height,
                &revertible,
            )?;

            info!(
                %wallet,
                addresses = names.len(),
                txids = stats.0,
                utxos = stats.1,
                "imported address history"
            );
        }

        db.apply_indexing_task(task.finalize(), None, 0)?;

        // committed, blocks from now on must see the new addresses
        for (_, key) in new.iter() {
            engine.watched_mut().insert(key);
        }

        Ok(results)
    }

    /// History of freshly imported addresses up to the local tip, returns (txids, utxos) written.
    ///
    /// Rows from blocks that can still be disconnected are attributed to those blocks, a reorg
    /// removes them together with the block's own writes.
    fn backfill(
        &self,
        source: &impl ChainSource,
        task: &mut IndexingTask,
        wallet: WalletId,
        addresses: &[String],
        tip: BlockHeight,
        revertible: &HashMap<BlockHeight, Point>,
    ) -> Result<(usize, usize), Error> {
        let mut txids = 0;
        let mut utxos = 0;

        for (start, end) in split_range(1, tip, self.history_chunk_size) {
            for delta in source.address_deltas(addresses, start, end)? {
                let key = WalletTxidKey {
                    wallet,
                    height: delta.height,
                    index: delta.block_index,
                };

                task.attribute_to(revertible.get(&delta.height).copied());
                task.set::<WalletTxidKV>(key, delta.txid.to_byte_array())?;
                txids += 1;
            }
        }

        for utxo in source.address_utxos(addresses)? {
            // anything above the tip arrives through block application
            if utxo.height > tip {
                continue;
            }

            task.attribute_to(revertible.get(&utxo.height).copied());

            WalletUtxo {
                wallet,
                txid: utxo.txid.to_byte_array(),
                vout: utxo.output_index,
                height: utxo.height,
                satoshis: utxo.satoshis,
                address: AddressKey::parse(&utxo.address, self.network.into())?,
            }
            .insert(task)?;

            utxos += 1;
        }

        task.attribute_to(None);

        Ok((txids, utxos))
    }

    fn save_transactions<C: ChainSource>(
        &self,
        engine: &SyncEngine<C>,
        wallet: WalletId,
        transactions: &[WalletTransaction],
    ) -> Result<(), Error> {
        let db = engine.db();
        let mut task = db.begin_indexing_task(false)?;

        if !task.exists::<WalletKV>(&wallet)? {
            return Err(Error::not_found(format!("wallet {wallet}")));
        }

        for tx in transactions {
            if tx.wallet() != wallet {
                return Err(ValidationError::InvalidParam(format!(
                    "transaction {} belongs to wallet {}",
                    tx.txid(),
                    tx.wallet()
                ))
                .into());
            }

            let (key, value) = tx.to_kv();
            task.set::<WalletTransactionKV>(key, value)?;
        }

        db.apply_indexing_task(task.finalize(), None, 0)?;

        debug!(%wallet, count = transactions.len(), "saved wallet transactions");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rpc::{AddressDelta, AddressUtxo},
        shutdown::ShutdownSignal,
        storage::kv_store::tests::temp_store,
        sync::{
            Config,
            engine::tests::{SimChain, build_chain, p2pkh},
        },
        tables::{
            types::AddressType,
            wallet_transaction::Category,
            wallet_utxo::{OutpointKey, OutpointWalletsKV, WalletUtxoKV, WalletUtxoKey},
        },
    };
    use bitcoin::Txid;
    use serde_json::json;
    use std::sync::Arc;

    const WALLET: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn address(byte: u8) -> String {
        AddressKey {
            kind: AddressType::PubKeyHash,
            hash160: [byte; 20],
        }
        .to_address(bitcoin::Network::Regtest)
        .to_string()
    }

    fn task(method: &str, params: Vec<Value>) -> Task {
        Task {
            id: "00000000".into(),
            method: method.into(),
            params,
        }
    }

    fn setup(chain: Arc<SimChain>) -> (tempfile::TempDir, SyncEngine<Arc<SimChain>>) {
        let (dir, store) = temp_store();
        let config = Config {
            start_height: Some(0),
            ..Default::default()
        };

        let engine = SyncEngine::new(chain, store, &config, ShutdownSignal::new()).unwrap();

        (dir, engine)
    }

    #[test]
    fn split_range_sections() {
        assert_eq!(split_range(1, 10, 3), vec![(1, 3), (4, 6), (7, 9), (10, 10)]);

        let sections = split_range(1, 417_769, 100_000);
        assert_eq!(sections.len(), 5);
        assert_eq!(sections.first().unwrap().0, 1);
        assert_eq!(sections.last().unwrap().1, 417_769);
        assert!(sections.windows(2).all(|w| w[0].1 + 1 == w[1].0));

        assert!(split_range(5, 4, 10).is_empty());
        assert_eq!(split_range(u32::MAX, u32::MAX, 10), vec![(u32::MAX, u32::MAX)]);
    }

    #[test]
    fn create_wallet_is_idempotent() {
        let chain = Arc::new(SimChain::default());
        let (_dir, mut engine) = setup(chain);
        let runner = TaskRunner::new(Network::Regtest, 100);

        let create = task(CREATE_WALLET, vec![json!(WALLET)]);

        assert_eq!(runner.run(&mut engine, &create).unwrap(), json!({ "created": true }));
        assert_eq!(runner.run(&mut engine, &create).unwrap(), json!({ "created": false }));
    }

    #[test]
    fn bad_params_and_unknown_methods_fail() {
        let chain = Arc::new(SimChain::default());
        let (_dir, mut engine) = setup(chain);
        let runner = TaskRunner::new(Network::Regtest, 100);

        assert!(matches!(
            runner.run(&mut engine, &task(CREATE_WALLET, vec![json!("abcd")])),
            Err(Error::Validation(ValidationError::InvalidParam(_)))
        ));
        assert!(matches!(
            runner.run(&mut engine, &task(CREATE_WALLET, vec![])),
            Err(Error::Validation(ValidationError::InvalidParam(_)))
        ));
        assert!(matches!(
            runner.run(&mut engine, &task("dropWallet", vec![json!(WALLET)])),
            Err(Error::Writer(_))
        ));
    }

    #[test]
    fn import_requires_wallet() {
        let chain = Arc::new(SimChain::default());
        let (_dir, mut engine) = setup(chain);
        let runner = TaskRunner::new(Network::Regtest, 100);

        let import = task(IMPORT_ADDRESSES, vec![json!(WALLET), json!([address(1)])]);

        assert!(matches!(
            runner.run(&mut engine, &import),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn import_writes_indexes_and_backfills_history() {
        let chain = Arc::new(SimChain::default());
        chain.replace(build_chain(&[], 21, 0, &p2pkh(0xee)));

        let history_txid = Txid::from_byte_array([7; 32]);
        let utxo_txid = Txid::from_byte_array([8; 32]);

        *chain.deltas.lock().unwrap() = vec![
            AddressDelta {
                address: address(1),
                txid: history_txid,
                index: 0,
                satoshis: 5_000,
                block_index: 3,
                height: 12,
            },
            // lands in the last chunk
            AddressDelta {
                address: address(2),
                txid: history_txid,
                index: 1,
                satoshis: 1,
                block_index: 4,
                height: 17,
            },
        ];

        *chain.utxos.lock().unwrap() = vec![
            AddressUtxo {
                address: address(1),
                txid: utxo_txid,
                output_index: 2,
                script: String::new(),
                satoshis: 42,
                height: 15,
            },
            AddressUtxo {
                address: address(1),
                txid: utxo_txid,
                output_index: 3,
                script: String::new(),
                satoshis: 1,
                height: 25,
            },
        ];

        let (_dir, mut engine) = setup(chain);
        engine.run().unwrap();
        assert_eq!(engine.local_tip().unwrap().unwrap().height, 20);

        let runner = TaskRunner::new(Network::Regtest, 5);
        let wallet: WalletId = WALLET.parse().unwrap();

        runner
            .run(&mut engine, &task(CREATE_WALLET, vec![json!(WALLET)]))
            .unwrap();

        let import = task(
            IMPORT_ADDRESSES,
            vec![json!(WALLET), json!([address(1), address(2), address(1)])],
        );

        let result = runner.run(&mut engine, &import).unwrap();
        assert_eq!(
            result,
            json!({ "addresses": { address(1): true, address(2): true } })
        );

        // again, nothing new
        let again = runner.run(&mut engine, &import).unwrap();
        assert_eq!(
            again,
            json!({ "addresses": { address(1): false, address(2): false } })
        );

        let db = engine.db().clone();
        let reader = db.reader().unwrap();

        let record = reader.get::<WalletKV>(&wallet).unwrap().unwrap();
        assert_eq!(record.address_count, 2);

        let key1 = AddressKey::parse(&address(1), bitcoin::Network::Regtest).unwrap();
        assert!(record.filter.contains(&key1.filter_bytes()));
        assert!(engine.watched_mut().may_contain(&key1));

        let owners = reader.get::<AddressWalletMapKV>(&key1).unwrap().unwrap();
        assert!(owners.contains(&wallet));

        for (height, index) in [(12, 3), (17, 4)] {
            let txid = reader
                .get::<WalletTxidKV>(&WalletTxidKey {
                    wallet,
                    height,
                    index,
                })
                .unwrap();

            assert_eq!(txid, Some(history_txid.to_byte_array()));
        }

        let utxo_key = |vout| WalletUtxoKey {
            wallet,
            txid: utxo_txid.to_byte_array(),
            vout,
        };

        assert!(reader.exists::<WalletUtxoKV>(&utxo_key(2)).unwrap());
        assert!(!reader.exists::<WalletUtxoKV>(&utxo_key(3)).unwrap());

        let outpoint_owners = reader
            .get::<OutpointWalletsKV>(&OutpointKey {
                txid: utxo_txid.to_byte_array(),
                vout: 2,
            })
            .unwrap()
            .unwrap();
        assert!(outpoint_owners.contains(&wallet));
    }

    #[test]
    fn imported_history_from_orphaned_blocks_is_removed_by_reorg() {
        let chain = Arc::new(SimChain::default());
        let script = p2pkh(0xee);

        // blocks agree up to height 5, branch 1 is orphaned from height 6 on
        let common = build_chain(&[], 6, 0, &script);
        let old_branch = build_chain(&common, 10, 1, &script);
        let orphaned = old_branch[8].txdata[0].compute_txid();
        let kept = Txid::from_byte_array([3; 32]);
        chain.replace(old_branch);

        *chain.deltas.lock().unwrap() = vec![
            AddressDelta {
                address: address(1),
                txid: kept,
                index: 0,
                satoshis: 700,
                block_index: 1,
                height: 3,
            },
            AddressDelta {
                address: address(1),
                txid: orphaned,
                index: 0,
                satoshis: 1_008,
                block_index: 0,
                height: 8,
            },
        ];

        *chain.utxos.lock().unwrap() = vec![
            AddressUtxo {
                address: address(1),
                txid: kept,
                output_index: 0,
                script: String::new(),
                satoshis: 700,
                height: 3,
            },
            AddressUtxo {
                address: address(1),
                txid: orphaned,
                output_index: 0,
                script: String::new(),
                satoshis: 1_008,
                height: 8,
            },
        ];

        let (_dir, mut engine) = setup(chain.clone());
        engine.run().unwrap();
        assert_eq!(engine.local_tip().unwrap().unwrap().height, 9);

        let runner = TaskRunner::new(Network::Regtest, 100);
        let wallet: WalletId = WALLET.parse().unwrap();

        runner
            .run(&mut engine, &task(CREATE_WALLET, vec![json!(WALLET)]))
            .unwrap();
        runner
            .run(
                &mut engine,
                &task(IMPORT_ADDRESSES, vec![json!(WALLET), json!([address(1)])]),
            )
            .unwrap();

        let txid_at = |height, index| WalletTxidKey {
            wallet,
            height,
            index,
        };
        let utxo_of = |txid: Txid| WalletUtxoKey {
            wallet,
            txid: txid.to_byte_array(),
            vout: 0,
        };
        let outpoint_of = |txid: Txid| OutpointKey {
            txid: txid.to_byte_array(),
            vout: 0,
        };

        {
            let reader = engine.db().reader().unwrap();
            assert!(reader.exists::<WalletTxidKV>(&txid_at(8, 0)).unwrap());
            assert!(reader.exists::<WalletUtxoKV>(&utxo_of(orphaned)).unwrap());
        }

        let new_branch = build_chain(&common, 12, 2, &script);
        let new_tip = new_branch.last().unwrap().block_hash();
        chain.replace(new_branch);

        engine.run().unwrap();
        assert_eq!(engine.local_tip().unwrap().unwrap().hash, new_tip);

        let reader = engine.db().reader().unwrap();

        // rows from the orphaned block went with it
        assert!(!reader.exists::<WalletTxidKV>(&txid_at(8, 0)).unwrap());
        assert!(!reader.exists::<WalletUtxoKV>(&utxo_of(orphaned)).unwrap());
        assert!(!reader.exists::<OutpointWalletsKV>(&outpoint_of(orphaned)).unwrap());

        // history below the fork and the import itself survive
        assert!(reader.exists::<WalletTxidKV>(&txid_at(3, 1)).unwrap());
        assert!(reader.exists::<WalletUtxoKV>(&utxo_of(kept)).unwrap());
        assert!(reader.exists::<OutpointWalletsKV>(&outpoint_of(kept)).unwrap());

        let key = AddressKey::parse(&address(1), bitcoin::Network::Regtest).unwrap();
        assert!(
            reader
                .exists::<WalletAddressKV>(&WalletAddressKey {
                    wallet,
                    address: key
                })
                .unwrap()
        );
        assert!(
            reader
                .get::<AddressWalletMapKV>(&key)
                .unwrap()
                .unwrap()
                .contains(&wallet)
        );
    }

    #[test]
    fn import_rejects_foreign_network_addresses() {
        let chain = Arc::new(SimChain::default());
        let (_dir, mut engine) = setup(chain);
        let runner = TaskRunner::new(Network::Regtest, 100);

        runner
            .run(&mut engine, &task(CREATE_WALLET, vec![json!(WALLET)]))
            .unwrap();

        let mainnet = AddressKey {
            kind: AddressType::ScriptHash,
            hash160: [3; 20],
        }
        .to_address(bitcoin::Network::Bitcoin)
        .to_string();

        let import = task(
            IMPORT_ADDRESSES,
            vec![json!(WALLET), json!([address(1), mainnet])],
        );

        assert!(matches!(
            runner.run(&mut engine, &import),
            Err(Error::Validation(ValidationError::NetworkMismatch(_)))
        ));

        // nothing from the request was written
        let wallet: WalletId = WALLET.parse().unwrap();
        let record = engine.db().reader().unwrap().get::<WalletKV>(&wallet).unwrap();
        assert_eq!(record.unwrap().address_count, 0);
    }

    #[test]
    fn save_transaction_checks_owner() {
        let chain = Arc::new(SimChain::default());
        let (_dir, mut engine) = setup(chain);
        let runner = TaskRunner::new(Network::Regtest, 100);
        let wallet: WalletId = WALLET.parse().unwrap();

        runner
            .run(&mut engine, &task(CREATE_WALLET, vec![json!(WALLET)]))
            .unwrap();

        let tx = |wallet: WalletId| {
            WalletTransaction::from_parts(
                Network::Regtest,
                AddressKey::parse(&address(1), bitcoin::Network::Regtest).unwrap(),
                wallet,
                Txid::from_byte_array([9; 32]),
                10,
                Category::Receive,
                0,
                500,
            )
        };

        let save = WriterMethod::SaveTransaction {
            wallet,
            transactions: vec![tx(wallet)],
        }
        .into_task("00000001".into())
        .unwrap();

        assert_eq!(runner.run(&mut engine, &save).unwrap(), Value::Null);

        let (key, value) = tx(wallet).to_kv();
        let stored = engine
            .db()
            .reader()
            .unwrap()
            .get::<WalletTransactionKV>(&key)
            .unwrap();
        assert_eq!(stored, Some(value));

        let foreign = WriterMethod::SaveTransaction {
            wallet,
            transactions: vec![tx(WalletId([2; 32]))],
        }
        .into_task("00000002".into())
        .unwrap();

        assert!(matches!(
            runner.run(&mut engine, &foreign),
            Err(Error::Validation(ValidationError::InvalidParam(_)))
        ));
    }
}
