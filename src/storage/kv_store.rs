use std::{collections::HashMap, ops::Range, path::PathBuf, sync::Arc};

use bitcoin::hashes::Hash;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options,
    ReadOptions, SnapshotWithThreadMode, WriteBatch,
};
use sysinfo::{Pid, System};
use tracing::{info, trace, warn};
use wallet_symphony_macros::{Decode, Encode};

use crate::{
    error::Error,
    sync::Point,
    tables::rollback_buffer::{RollbackBufferKV, RollbackKey},
};

use super::{
    encdec::{Decode, Encode},
    table::{Table, TableCursor, TableIterator},
};

static SYMPHONY_CF_NAME: &str = "symphony";

pub type Db = rocksdb::DB;
pub type RawKey = Vec<u8>;
pub type RawValue = Vec<u8>;

/// A unit of writes against storage.
///
/// Writes are buffered and only reach storage when the finalized task is applied, as a single
/// atomic write batch. Reads check the buffer first, so a task observes its own writes.
pub struct IndexingTask<'a> {
    db: &'a Db,
    cf_handle: &'a ColumnFamily,
    // when we write keys, we do not write to storage, we manipulate here until we flush via write batch
    // when we read, we first check for the key here and if we dont find it we use storage
    write_buffer: HashMap<RawKey, StorageAction>,
    // when we are maintaining a rollback buffer, we need to store original KVs for any modified keys
    original_kvs: Option<HashMap<RawKey, PreviousValue>>,
    // writes made on behalf of blocks applied earlier, see `attribute_to`
    attributing: Option<Point>,
    attributed_kvs: HashMap<RawKey, (Point, PreviousValue)>,
}

impl IndexingTask<'_> {
    pub fn get<T>(&self, key: &T::Key) -> Result<Option<T::Value>, Error>
    where
        T: Table,
    {
        let encoded_key = T::encode_key(key);

        if let Some(action) = self.write_buffer.get(&encoded_key) {
            trace!("fetching {} from writebuf", hex::encode(&encoded_key));

            return match action {
                StorageAction::Set(value) => Ok(Some(T::Value::decode_exact(value)?)),
                StorageAction::Delete => Ok(None),
            };
        }

        trace!("fetching {} from storage", hex::encode(&encoded_key));

        self.db
            .get_cf(self.cf_handle, &encoded_key)?
            .map(|bytes| T::Value::decode_exact(&bytes).map_err(Error::from))
            .transpose()
    }

    pub fn exists<T>(&self, key: &T::Key) -> Result<bool, Error>
    where
        T: Table,
    {
        Ok(self.get::<T>(key)?.is_some())
    }

    pub fn set<T>(&mut self, key: T::Key, value: T::Value) -> Result<(), Error>
    where
        T: Table,
    {
        let encoded_key = T::encode_key(&key);
        let encoded_value = value.encode();

        trace!("setting {}", hex::encode(&encoded_key));

        self.maybe_store_original_kv(&encoded_key)?;
        self.maybe_attribute_kv(&encoded_key)?;

        self.write_buffer
            .insert(encoded_key, StorageAction::Set(encoded_value));

        Ok(())
    }

    pub fn delete<T>(&mut self, key: T::Key) -> Result<(), Error>
    where
        T: Table,
    {
        let encoded_key = T::encode_key(&key);

        trace!("deleting {}", hex::encode(&encoded_key));

        self.maybe_store_original_kv(&encoded_key)?;
        self.maybe_attribute_kv(&encoded_key)?;

        self.write_buffer.insert(encoded_key, StorageAction::Delete);

        Ok(())
    }

    /// If we are recording rollback data, this will store the original KV for any keys modified
    /// during the task, such that we can use them to later undo the effects of the task.
    fn maybe_store_original_kv(&mut self, raw_key: &RawKey) -> Result<(), Error> {
        if let Some(original_kvs) = self.original_kvs.as_mut() {
            // Only need to do once per key, the first write sees the pre-task value
            if !original_kvs.contains_key(raw_key) {
                let original_value = self.db.get_cf(self.cf_handle, raw_key)?.into();

                original_kvs.insert(raw_key.clone(), original_value);
            }
        }

        Ok(())
    }

    /// Attribute the following writes to the already applied block at `point`, until called
    /// again with `None`. Their pre-task values join that block's rollback data, so that
    /// disconnecting the block also reverts them. Keys the block recorded itself keep the
    /// block's entry.
    pub fn attribute_to(&mut self, point: Option<Point>) {
        self.attributing = point;
    }

    fn maybe_attribute_kv(&mut self, raw_key: &RawKey) -> Result<(), Error> {
        let Some(point) = self.attributing else {
            return Ok(());
        };

        if !self.attributed_kvs.contains_key(raw_key) {
            let original_value = self.db.get_cf(self.cf_handle, raw_key)?.into();

            self.attributed_kvs
                .insert(raw_key.clone(), (point, original_value));
        }

        Ok(())
    }

    pub fn finalize(self) -> FinalizedTask {
        FinalizedTask {
            write_buffer: self.write_buffer,
            original_kvs: self.original_kvs,
            attributed_kvs: self.attributed_kvs,
        }
    }
}

pub struct FinalizedTask {
    pub write_buffer: HashMap<RawKey, StorageAction>,
    pub original_kvs: Option<HashMap<RawKey, PreviousValue>>,
    pub attributed_kvs: HashMap<RawKey, (Point, PreviousValue)>,
}

impl FinalizedTask {
    pub fn mutations(&self) -> usize {
        self.write_buffer.len()
    }
}

/// Handle to the store. The writer opens it as the RocksDB primary, readers open it as a
/// secondary instance which has to be told to catch up with the primary.
#[derive(Clone)]
pub struct StorageHandler {
    pub db: Arc<Db>,
    read_only: bool,
}

impl StorageHandler {
    pub fn open(path: PathBuf, read_only: bool, memory_budget: u64) -> Result<Self, Error> {
        info!(path = %path.display(), read_only, "opening db...");

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        // Enable RocksDB statistics for monitoring
        db_opts.enable_statistics();
        db_opts.set_report_bg_io_stats(true);

        info!(
            "using rocksdb memory budget: {:.2} GB ({} bytes)",
            memory_budget as f64 / 1024.0 / 1024.0 / 1024.0,
            memory_budget
        );

        let block_cache_budget = (memory_budget as f64 * 0.75) as usize;
        let memtable_budget = (memory_budget as f64 * 0.25) as usize;

        let cache = Cache::new_lru_cache(block_cache_budget);

        let sys = System::new_all();
        let cpus = sys.cpus().len().max(1) as i32;
        db_opts.set_max_background_jobs(cpus.max(2));
        db_opts.set_max_subcompactions(cpus as u32);

        let mut cf_opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        cf_opts.set_block_based_table_factory(&block_opts);

        let per_memtable_cap = 512 * 1024 * 1024;
        cf_opts.set_write_buffer_size(std::cmp::min(memtable_budget / 2, per_memtable_cap));
        cf_opts.set_max_write_buffer_number(2);

        let cfs = vec![ColumnFamilyDescriptor::new(SYMPHONY_CF_NAME, cf_opts)];

        let db = if read_only {
            let mut secondary_path = path.clone();
            secondary_path.push(format!("secondary-{}", std::process::id()));
            Db::open_cf_descriptors_as_secondary(&db_opts, &path, &secondary_path, cfs)?
        } else {
            Db::open_cf_descriptors(&db_opts, &path, cfs)?
        };

        Ok(Self {
            db: Arc::new(db),
            read_only,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn cf_handle(&self) -> Result<&ColumnFamily, Error> {
        self.db
            .cf_handle(SYMPHONY_CF_NAME)
            .ok_or_else(|| Error::custom("column family missing"))
    }

    /// Begin a task. If `rollback` is set the previous value of every key written by the task is
    /// recorded so that the task can later be undone with `rollback_point`.
    pub fn begin_indexing_task(&self, rollback: bool) -> Result<IndexingTask<'_>, Error> {
        Ok(IndexingTask {
            db: &self.db,
            cf_handle: self.cf_handle()?,
            write_buffer: HashMap::new(),
            original_kvs: rollback.then(HashMap::new),
            attributing: None,
            attributed_kvs: HashMap::new(),
        })
    }

    /// Finish the task, by flushing all the pending writes to storage, along with the original
    /// KVs into the persistent rollback buffer under `point`. Rollback entries more than
    /// `max_rollback` blocks below `point` are discarded in the same batch.
    pub fn apply_indexing_task(
        &self,
        task: FinalizedTask,
        point: Option<&Point>,
        max_rollback: u32,
    ) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::custom("cannot write through a read-only store handle"));
        }

        let mut wb = WriteBatch::default();
        let cf = self.cf_handle()?;

        for (key, action) in task.write_buffer {
            match action {
                StorageAction::Set(value) => wb.put_cf(cf, key, value),
                StorageAction::Delete => wb.delete_cf(cf, key),
            }
        }

        if let (Some(original_kvs), Some(point)) = (task.original_kvs, point) {
            for (key, original) in original_kvs {
                let rollback_key = RollbackBufferKV::encode_key(&RollbackKey {
                    height: point.height,
                    hash: point.hash.to_byte_array(),
                    key,
                });

                wb.put_cf(cf, rollback_key, original.encode())
            }

            // maintain at most `max_rollback` blocks of rollback data
            let remove_before = point.height.saturating_sub(max_rollback);

            if remove_before > 0 {
                let gc_range = RollbackBufferKV::encode_range(None::<&()>, Some(&remove_before));
                wb.delete_range_cf(cf, gc_range.start, gc_range.end);
            }
        }

        for (key, (point, original)) in task.attributed_kvs {
            let rollback_key = RollbackBufferKV::encode_key(&RollbackKey {
                height: point.height,
                hash: point.hash.to_byte_array(),
                key,
            });

            // the block's own entry already holds the value from before the block
            if self.db.get_cf(cf, &rollback_key)?.is_none() {
                wb.put_cf(cf, rollback_key, original.encode());
            }
        }

        self.db.write(wb)?;

        Ok(())
    }

    /// Undo every write recorded in the rollback buffer for `point`, removing the rollback
    /// entries in the same batch. Returns the number of keys restored.
    pub fn rollback_point(&self, point: &Point) -> Result<usize, Error> {
        let prefix = (point.height, point.hash.to_byte_array());

        let entries = {
            let reader = self.reader()?;

            reader
                .iter_kvs::<RollbackBufferKV>(RollbackBufferKV::prefix_range(&prefix), false)
                .collect::<Result<Vec<_>, _>>()?
        };

        if entries.is_empty() {
            return Err(Error::RollbackUnavailable(*point));
        }

        let cf = self.cf_handle()?;
        let mut wb = WriteBatch::default();

        for (rollback_key, original) in entries.iter() {
            // perform inverse action
            match original {
                PreviousValue::Present(prev) => wb.put_cf(cf, &rollback_key.key, prev),
                PreviousValue::NotPresent => wb.delete_cf(cf, &rollback_key.key),
            }

            wb.delete_cf(cf, RollbackBufferKV::encode_key(rollback_key));
        }

        self.db.write(wb)?;

        Ok(entries.len())
    }

    /// Open a read-only snapshot. The snapshot is released when the reader is dropped.
    pub fn reader(&self) -> Result<Reader<'_>, Error> {
        Ok(Reader {
            cf_handle: self.cf_handle()?,
            snapshot: self.db.snapshot(),
        })
    }

    /// Secondary instances only see data written by the primary after being told to catch up
    pub fn try_refresh_read_only_data(&self) -> Result<(), Error> {
        if self.read_only {
            self.db.try_catch_up_with_primary()?
        }

        Ok(())
    }
}

/// Repeatable-read view of the store
pub struct Reader<'a> {
    cf_handle: &'a ColumnFamily,
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl Reader<'_> {
    pub fn get<T>(&self, key: &T::Key) -> Result<Option<T::Value>, Error>
    where
        T: Table,
    {
        match self.snapshot.get_cf(self.cf_handle, T::encode_key(key))? {
            Some(bytes) => Ok(Some(T::Value::decode_exact(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists<T>(&self, key: &T::Key) -> Result<bool, Error>
    where
        T: Table,
    {
        Ok(self.snapshot.get_cf(self.cf_handle, T::encode_key(key))?.is_some())
    }

    pub fn iter_kvs<T: Table>(&self, range: Range<Vec<u8>>, reverse: bool) -> TableIterator<'_, T> {
        let mode = if reverse {
            IteratorMode::End
        } else {
            IteratorMode::Start
        };

        let iter = self
            .snapshot
            .iterator_cf_opt(self.cf_handle, bounded_read_opts(range), mode);

        TableIterator::<T>::new(iter)
    }

    /// Cursor over the keys of `T` which start with `prefix` (a full encoded key prefix,
    /// including the table id)
    pub fn cursor<T: Table>(&self, prefix: Vec<u8>) -> TableCursor<'_, T> {
        let iter = self
            .snapshot
            .raw_iterator_cf_opt(self.cf_handle, bounded_read_opts(prefix_range(&prefix)));

        TableCursor::new(iter, prefix)
    }

    /// Every raw KV in the store, for debugging
    pub fn raw_kvs(&self) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), Error>> + '_ {
        self.snapshot
            .iterator_cf(self.cf_handle, IteratorMode::Start)
            .map(|x| x.map_err(Error::from))
    }
}

fn prefix_range(prefix: &[u8]) -> Range<Vec<u8>> {
    super::encdec::prefix_key_range(prefix)
}

fn bounded_read_opts(range: Range<Vec<u8>>) -> ReadOptions {
    let mut read_opts = ReadOptions::default();

    read_opts.set_iterate_lower_bound(range.start);

    // an empty end means the range is unbounded above
    if !range.end.is_empty() {
        read_opts.set_iterate_upper_bound(range.end);
    }

    read_opts
}

pub enum StorageAction {
    Set(RawValue),
    Delete,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum PreviousValue {
    Present(RawValue),
    NotPresent,
}

impl From<Option<RawValue>> for PreviousValue {
    fn from(option: Option<RawValue>) -> Self {
        match option {
            Some(value) => PreviousValue::Present(value),
            None => PreviousValue::NotPresent,
        }
    }
}

impl StorageHandler {
    pub fn print_perf_snapshot(&self) {
        let Ok(cf) = self.cf_handle() else {
            return;
        };

        let property = |name: &str| -> u64 {
            match self.db.property_int_value_cf(cf, name) {
                Ok(value) => value.unwrap_or_default(),
                Err(e) => {
                    warn!("failed to read rocksdb property {name}: {e}");
                    0
                }
            }
        };

        let memtables = property("rocksdb.cur-size-all-mem-tables");
        let block_cache = property("rocksdb.block-cache-usage");
        let pending_compaction = property("rocksdb.estimate-pending-compaction-bytes");
        let running_compactions = property("rocksdb.num-running-compactions");

        let sys = System::new_all();
        let app_mem_kb = sys
            .process(Pid::from_u32(std::process::id()))
            .map(|p| p.memory() / 1024)
            .unwrap_or_default();

        info!(
            app_mem_kb,
            memtables_mb = memtables / 1024 / 1024,
            block_cache_mb = block_cache / 1024 / 1024,
            pending_compaction_mb = pending_compaction / 1024 / 1024,
            running_compactions,
            free_mem_mb = sys.free_memory() / 1024 / 1024,
            total_mem_mb = sys.total_memory() / 1024 / 1024,
            "rocksdb performance stats"
        );
    }
}
