use thiserror::Error;

use crate::{DecodingError, rpc::RpcError, sync::Point};

/// Input rejected at a boundary, never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid wallet id: {0}")]
    InvalidWalletId(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unsupported address type: {0}")]
    UnsupportedAddress(String),

    #[error("address {0} is not valid for the configured network")]
    NetworkMismatch(String),

    #[error("invalid txid: {0}")]
    InvalidTxid(String),

    #[error("invalid height: {0}")]
    InvalidHeight(String),

    #[error("limit {requested} exceeds the maximum of {max}")]
    LimitTooLarge { requested: u32, max: u32 },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("no rollback data for {0}")]
    RollbackUnavailable(Point),

    #[error("no common ancestor with the source chain at or below height {0}")]
    NoCommonAncestor(u32),

    #[error("writer error: {0}")]
    Writer(String),

    #[error("writer channel closed")]
    WriterDisconnected,

    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("writer did not stop within {0} seconds")]
    ShutdownTimeout(u64),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(error: impl std::fmt::Display) -> Error {
        Error::Custom(format!("{error}"))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Error {
        Error::NotFound(format!("{what}"))
    }
}

impl From<Box<dyn std::error::Error>> for Error {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        Error::custom(err)
    }
}
