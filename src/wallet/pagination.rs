use bitcoin::{Txid, hashes::Hash};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::{Error, ValidationError},
    storage::{
        kv_store::{Reader, StorageHandler},
        table::Table,
    },
    sync::BlockHeight,
    tables::{
        types::WalletId,
        wallet_txid::{WalletTxidKV, WalletTxidKey},
    },
};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 500;

/// Place in a wallet's history
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
pub struct Position {
    pub height: BlockHeight,
    pub index: u32,
}

impl Position {
    /// The position immediately before this one, `None` at the very beginning
    pub fn predecessor(&self) -> Option<Position> {
        match (self.height, self.index) {
            (0, 0) => None,
            (height, 0) => Some(Position {
                height: height - 1,
                index: u32::MAX,
            }),
            (height, index) => Some(Position {
                height,
                index: index - 1,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxidPage {
    /// Newest first
    pub txids: Vec<Txid>,
    pub start: Position,
    /// Position of the oldest returned entry, present only when the page is full and older
    /// entries may exist
    pub end: Option<Position>,
}

pub fn check_limit(limit: u32) -> Result<u32, ValidationError> {
    if limit > MAX_LIMIT {
        return Err(ValidationError::LimitTooLarge {
            requested: limit,
            max: MAX_LIMIT,
        });
    }

    Ok(limit)
}

/// Walk a wallet's history backwards from `start` (inclusive), collecting up to `limit` txids.
/// When there is no entry at `start` the walk begins at the nearest older entry.
pub fn get_latest_txids(
    reader: &Reader,
    wallet: &WalletId,
    start: Position,
    limit: u32,
) -> Result<TxidPage, Error> {
    let limit = check_limit(limit)?;

    let mut txids = Vec::with_capacity(limit as usize);
    let mut oldest = None;

    if limit > 0 {
        let mut cursor = reader.cursor::<WalletTxidKV>(WalletTxidKV::encode_prefix(wallet));

        cursor.seek_or_prev(&WalletTxidKey {
            wallet: *wallet,
            height: start.height,
            index: start.index,
        });

        while txids.len() < limit as usize {
            let Some(kv) = cursor.current() else {
                break;
            };

            let (key, txid) = kv?;

            txids.push(Txid::from_byte_array(txid));
            oldest = Some(Position {
                height: key.height,
                index: key.index,
            });

            cursor.prev();
        }
    }

    let end = if limit > 0 && txids.len() == limit as usize {
        oldest
    } else {
        None
    };

    Ok(TxidPage { txids, start, end })
}

/// Lazy, finite sequence of history pages, newest first. Each page is read from a fresh
/// snapshot, the next page starting right before the previous page's `end`.
pub struct TxidPager {
    db: StorageHandler,
    wallet: WalletId,
    next: Option<Position>,
    limit: u32,
}

impl TxidPager {
    pub fn new(
        db: StorageHandler,
        wallet: WalletId,
        start: Position,
        limit: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            db,
            wallet,
            next: Some(start),
            limit: check_limit(limit)?.max(1),
        })
    }
}

impl Iterator for TxidPager {
    type Item = Result<TxidPage, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next.take()?;

        let page = self
            .db
            .reader()
            .and_then(|reader| get_latest_txids(&reader, &self.wallet, start, self.limit));

        if let Ok(page) = &page {
            self.next = page.end.and_then(|end| end.predecessor());

            if page.txids.is_empty() {
                return None;
            }
        }

        Some(page)
    }
}
