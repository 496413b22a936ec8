use std::collections::HashMap;

use bitcoin::{BlockHash, hashes::Hash};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::{
    error::Error,
    rpc::ChainSource,
    shutdown::ShutdownSignal,
    storage::{kv_store::StorageHandler, table::Table},
    tables::{hash_by_height::HashByHeightKV, rollback_buffer::RollbackBufferKV},
};

use super::{
    BlockHeight, Point,
    indexer::{WatchedAddresses, apply_block},
};

/// Notifications for the host process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    BlockAdded(Point),
    BlockRemoved(Point),
    /// Local tip reached the source's tip
    Synced(Point),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Outcome of a single sync step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Empty index, recorded the base block without applying it
    Initialized(Point),
    Applied(Point),
    /// Block did not extend the local tip, the tip was undone
    Disconnected(Point),
    /// Nothing to fetch, the local tip is at or above the source height
    CaughtUp { tip: Point, source_height: u32 },
}

/// Keeps the index following the source's best chain, one block at a time.
///
/// Each step compares the next block's parent with the local tip: a match is applied, a
/// mismatch undoes the local tip, so repeated steps walk back to the fork and then forward
/// along the new branch.
pub struct SyncEngine<C> {
    source: C,
    db: StorageHandler,
    watched: WatchedAddresses,
    max_rollback: u32,
    start_height: Option<u32>,
    state: SyncState,
    shutdown: ShutdownSignal,
    events: Option<UnboundedSender<SyncEvent>>,
}

impl<C: ChainSource> SyncEngine<C> {
    pub fn new(
        source: C,
        db: StorageHandler,
        config: &super::Config,
        shutdown: ShutdownSignal,
    ) -> Result<Self, Error> {
        let watched = WatchedAddresses::load(&db.reader()?)?;

        Ok(Self {
            source,
            db,
            watched,
            max_rollback: config.max_rollback(),
            start_height: config.start_height,
            state: SyncState::Idle,
            shutdown,
            events: None,
        })
    }

    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn db(&self) -> &StorageHandler {
        &self.db
    }

    pub fn watched_mut(&mut self) -> &mut WatchedAddresses {
        &mut self.watched
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_syncing(&self) -> bool {
        self.state == SyncState::Syncing
    }

    pub fn local_tip(&self) -> Result<Option<Point>, Error> {
        HashByHeightKV::tip(&self.db.reader()?)
    }

    /// Applied blocks that still carry rollback data, by height. These are the blocks a reorg
    /// can disconnect.
    pub fn revertible_blocks(&self) -> Result<HashMap<BlockHeight, Point>, Error> {
        let reader = self.db.reader()?;

        let Some(tip) = HashByHeightKV::tip(&reader)? else {
            return Ok(HashMap::new());
        };

        let from = tip.height.saturating_sub(self.max_rollback);
        let range = HashByHeightKV::encode_range(Some(&from), None::<&()>);

        let mut blocks = HashMap::new();

        for kv in reader.iter_kvs::<HashByHeightKV>(range, false) {
            let (height, hash) = kv?;

            let recorded = reader
                .iter_kvs::<RollbackBufferKV>(RollbackBufferKV::prefix_range(&(height, hash)), false)
                .next()
                .transpose()?
                .is_some();

            if recorded {
                let hash = BlockHash::from_byte_array(hash);
                blocks.insert(height, Point { height, hash });
            }
        }

        Ok(blocks)
    }

    /// The source reported a new tip. Returns whether a sync was started.
    pub fn on_new_tip(&mut self) -> bool {
        if self.state == SyncState::Syncing || self.shutdown.is_triggered() {
            return false;
        }

        self.state = SyncState::Syncing;

        true
    }

    /// Perform one step while syncing, moving back to idle once caught up or on error
    pub fn sync_step(&mut self) -> Result<(), Error> {
        if self.state != SyncState::Syncing {
            return Ok(());
        }

        let step = match self.step() {
            Ok(step) => step,
            Err(e) => {
                self.state = SyncState::Idle;
                return Err(e);
            }
        };

        match step {
            Step::Initialized(point) => info!(%point, "initialized empty index"),
            Step::Applied(point) => self.emit(SyncEvent::BlockAdded(point)),
            Step::Disconnected(point) => self.emit(SyncEvent::BlockRemoved(point)),
            Step::CaughtUp { tip, source_height } => {
                self.state = SyncState::Idle;

                if tip.height == source_height {
                    info!(%tip, "synced");
                    self.emit(SyncEvent::Synced(tip));
                }
            }
        }

        Ok(())
    }

    /// Sync until caught up or shutdown is requested
    pub fn run(&mut self) -> Result<(), Error> {
        self.on_new_tip();

        while self.is_syncing() {
            if self.shutdown.is_triggered() {
                info!("stopping sync for shutdown");
                self.state = SyncState::Idle;
                break;
            }

            self.sync_step()?;
        }

        Ok(())
    }

    pub fn step(&mut self) -> Result<Step, Error> {
        let Some(local) = self.local_tip()? else {
            return self.initialize().map(Step::Initialized);
        };

        let source_height = self.source.chain_height()?;

        if local.height >= source_height {
            return Ok(Step::CaughtUp {
                tip: local,
                source_height,
            });
        }

        let block = self.source.raw_block(local.height + 1)?;

        if block.header.prev_blockhash != local.hash {
            warn!(
                tip = %local,
                parent = %block.header.prev_blockhash,
                "reorg detected, disconnecting local tip"
            );

            self.disconnect(&local)?;

            return Ok(Step::Disconnected(local));
        }

        let mut task = self.db.begin_indexing_task(true)?;

        let (point, stats) = apply_block(&mut task, &block, local.height + 1, &self.watched)?;

        self.db
            .apply_indexing_task(task.finalize(), Some(&point), self.max_rollback)?;

        if stats.wallet_txs > 0 {
            info!(
                %point,
                utxos_created = stats.utxos_created,
                utxos_spent = stats.utxos_spent,
                "block touched watched wallets"
            );
        }

        Ok(Step::Applied(point))
    }

    fn initialize(&mut self) -> Result<Point, Error> {
        let height = match self.start_height {
            Some(height) => height,
            None => self.source.chain_height()?,
        };

        let point = Point {
            height,
            hash: self.source.block_hash(height)?,
        };

        let mut task = self.db.begin_indexing_task(false)?;
        task.set::<HashByHeightKV>(height, point.hash.to_byte_array())?;
        self.db.apply_indexing_task(task.finalize(), None, self.max_rollback)?;

        Ok(point)
    }

    fn disconnect(&mut self, tip: &Point) -> Result<(), Error> {
        match self.db.rollback_point(tip) {
            Ok(restored) => {
                info!(%tip, restored, "disconnected block");
                Ok(())
            }
            Err(Error::RollbackUnavailable(point)) => {
                // the base of the index has no rollback data, nothing below it to fall back to
                let range = HashByHeightKV::encode_range(None::<&()>, Some(&tip.height));
                let below = self
                    .db
                    .reader()?
                    .iter_kvs::<HashByHeightKV>(range, true)
                    .next()
                    .transpose()?;

                match below {
                    None => Err(Error::NoCommonAncestor(tip.height)),
                    Some(_) => Err(Error::RollbackUnavailable(point)),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            // receiver gone just means nobody is listening
            let _ = events.send(event);
        }
    }
}
