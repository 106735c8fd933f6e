//! Typed error hierarchy. One enum per module boundary, composed upward into
//! `IndexerError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node unavailable (circuit open)")]
    NodeUnavailable,
    #[error("requested height {0} is beyond the node's tip")]
    HeightBeyondTip(u64),
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum GlyphError {
    #[error("malformed glyph metadata: {0}")]
    MalformedMetadata(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("height {height} already occupied by a different block hash")]
    ConflictingBlock { height: u64 },
    #[error("spend references unknown utxo {txid}:{vout}")]
    MissingPrevout { txid: String, vout: u32 },
    #[error("storage integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("rocksdb error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("serialization error: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("reorg depth exceeds reorg_limit ({limit})")]
    DeepReorg { limit: u32 },
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("sync cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Glyph(#[from] GlyphError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
