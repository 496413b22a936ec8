pub mod address_filter;
pub mod hash_by_height;
pub mod rollback_buffer;
pub mod types;
pub mod wallet;
pub mod wallet_address;
pub mod wallet_transaction;
pub mod wallet_txid;
pub mod wallet_utxo;

/// One byte key prefix of each table in the shared column family
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableId {
    Wallet = 0x01,
    WalletAddress = 0x02,
    AddressWalletMap = 0x03,
    WalletTxid = 0x04,
    WalletTransaction = 0x05,
    WalletUtxo = 0x06,
    WalletUtxoByHeight = 0x07,
    WalletUtxoBySatoshis = 0x08,
    OutpointWallets = 0x09,
    HashByHeight = 0x0a,
    RollbackBuffer = 0x0b,
    #[cfg(test)]
    Scratch = 0xf0,
}
