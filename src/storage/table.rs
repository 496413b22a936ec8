use std::{marker::PhantomData, ops::Range};

use rocksdb::{DBIteratorWithThreadMode, DBRawIteratorWithThreadMode};

use crate::error::Error;

use super::{
    encdec::{Decode, DecodingError, Encode, EncodeBuilder, prefix_key_range},
    kv_store::Db,
};

/// Defines a Table.
///
/// # Example
/// ```ignore
/// define_table! {
///     name: WalletTxidKV,
///     key_type: WalletTxidKey,
///     value_type: [u8; 32],
///     table: TableId::WalletTxid
/// }
/// ```
#[macro_export]
macro_rules! define_table {
    {
        name: $name:ident,
        key_type: $key_type:ty,
        value_type: $value_type:ty,
        table: $table_id:expr
    } => {
        pub struct $name;

        impl $crate::storage::table::TableBase for $name {
            type Key = $key_type;
            type Value = $value_type;
        }

        impl $crate::storage::table::Table for $name {
            const TABLE_ID: u8 = $table_id as u8;
        }
    };
}

/// Common trait with basic table requirements
pub trait TableBase {
    /// Key type for the table.
    type Key: Encode + Decode;

    /// Value type for the table.
    type Value: Encode + Decode;
}

/// A table shares the single column family with every other table, namespaced by a one byte
/// prefix. Everything after the prefix is the encoded key.
pub trait Table: TableBase {
    const TABLE_ID: u8;

    /// Encodes the full key by combining the table prefix and the encoded key.
    fn encode_key(key: &Self::Key) -> Vec<u8> {
        Self::encode_prefix(key)
    }

    /// Inverse of `encode_key`, failing if the raw key belongs to another table
    fn decode_key(raw: &[u8]) -> Result<Self::Key, DecodingError> {
        match raw.split_first() {
            Some((id, rest)) if *id == Self::TABLE_ID => Self::Key::decode_exact(rest),
            _ => Err(DecodingError::WrongTable {
                expected: Self::TABLE_ID,
            }),
        }
    }

    /// Table prefix followed by the encoding of a leading part of a key
    fn encode_prefix<P: Encode + ?Sized>(partial: &P) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&Self::TABLE_ID)
            .append(partial)
            .build()
    }

    /// All keys in the table starting with the given leading part of a key
    fn prefix_range<P: Encode + ?Sized>(partial: &P) -> Range<Vec<u8>> {
        prefix_key_range(&Self::encode_prefix(partial))
    }

    /// Range from `start` (inclusive) to `end` (exclusive), either of which may be left open in
    /// which case the range extends to the respective end of the table.
    fn encode_range<S: Encode, E: Encode>(start: Option<&S>, end: Option<&E>) -> Range<Vec<u8>> {
        let table = prefix_key_range(&[Self::TABLE_ID]);

        let start = start.map(Self::encode_prefix).unwrap_or(table.start);
        let end = end.map(Self::encode_prefix).unwrap_or(table.end);

        start..end
    }
}

fn decode_kv<T: Table>(key: &[u8], value: &[u8]) -> Result<(T::Key, T::Value), Error> {
    Ok((T::decode_key(key)?, T::Value::decode_exact(value)?))
}

/// Iterator over the decoded KVs of a table within a key range
pub struct TableIterator<'a, T: Table> {
    inner: DBIteratorWithThreadMode<'a, Db>,
    _table: PhantomData<T>,
}

impl<'a, T: Table> TableIterator<'a, T> {
    pub fn new(inner: DBIteratorWithThreadMode<'a, Db>) -> Self {
        Self {
            inner,
            _table: PhantomData,
        }
    }
}

impl<T: Table> Iterator for TableIterator<'_, T> {
    type Item = Result<(T::Key, T::Value), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;

        Some(
            next.map_err(Error::from)
                .and_then(|(k, v)| decode_kv::<T>(&k, &v)),
        )
    }
}

/// Bidirectional cursor over a table, confined to keys starting with a prefix.
///
/// Positioning methods leave the cursor either on a key within the prefix or invalid, in which
/// case `current` returns `None`.
pub struct TableCursor<'a, T: Table> {
    inner: DBRawIteratorWithThreadMode<'a, Db>,
    prefix: Vec<u8>,
    _table: PhantomData<T>,
}

impl<'a, T: Table> TableCursor<'a, T> {
    pub fn new(inner: DBRawIteratorWithThreadMode<'a, Db>, prefix: Vec<u8>) -> Self {
        Self {
            inner,
            prefix,
            _table: PhantomData,
        }
    }

    /// Position on the first key >= `key`
    pub fn seek(&mut self, key: &T::Key) {
        self.inner.seek(T::encode_key(key));
    }

    /// Position on `key` if present, otherwise on the nearest key below it
    pub fn seek_or_prev(&mut self, key: &T::Key) {
        self.inner.seek_for_prev(T::encode_key(key));
    }

    pub fn seek_last(&mut self) {
        let end = prefix_key_range(&self.prefix).end;

        if end.is_empty() {
            self.inner.seek_to_last();
        } else {
            self.inner.seek_for_prev(&end);

            // seek_for_prev lands on `end` itself if such a key exists
            if self.inner.key() == Some(end.as_slice()) {
                self.inner.prev();
            }
        }
    }

    pub fn next(&mut self) {
        if self.inner.valid() {
            self.inner.next();
        }
    }

    pub fn prev(&mut self) {
        if self.inner.valid() {
            self.inner.prev();
        }
    }

    /// The KV the cursor is positioned on, if it is within the prefix
    pub fn current(&self) -> Option<Result<(T::Key, T::Value), Error>> {
        if let Err(e) = self.inner.status() {
            return Some(Err(e.into()));
        }

        let key = self.inner.key()?;

        if !key.starts_with(&self.prefix) {
            return None;
        }

        let value = self.inner.value()?;

        Some(decode_kv::<T>(key, value))
    }
}
