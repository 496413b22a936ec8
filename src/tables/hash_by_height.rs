use bitcoin::{BlockHash, hashes::Hash};

use crate::{
    define_table,
    error::Error,
    storage::{kv_store::Reader, table::Table},
    sync::{BlockHeight, Point},
};

use super::TableId;

define_table! {
    name: HashByHeightKV,
    key_type: BlockHeight,
    value_type: [u8; 32],
    table: TableId::HashByHeight
}

impl HashByHeightKV {
    /// Highest block in the local index
    pub fn tip(reader: &Reader) -> Result<Option<Point>, Error> {
        let range = <Self>::encode_range(None::<&()>, None::<&()>);

        let res = reader.iter_kvs::<Self>(range, true).next().transpose()?;

        Ok(res.map(|(height, hash)| Point {
            height,
            hash: BlockHash::from_byte_array(hash),
        }))
    }
}
