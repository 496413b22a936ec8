use wallet_symphony_macros::{Decode, Encode};

use crate::{define_table, storage::kv_store::PreviousValue, sync::BlockHeight};

use super::TableId;

define_table! {
    name: RollbackBufferKV,
    key_type: RollbackKey,
    value_type: PreviousValue,
    table: TableId::RollbackBuffer
}

/// Raw key touched while applying the block at (height, hash)
#[derive(Encode, Decode, PartialEq, Hash, Eq, Clone, Debug)]
pub struct RollbackKey {
    pub height: BlockHeight,
    pub hash: [u8; 32],
    pub key: Vec<u8>,
}
