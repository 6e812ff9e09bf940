use thiserror::Error;

use grit_store::StoreError;
use grit_types::ObjectId;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid pack magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt pack: {0}")]
    CorruptPack(String),

    #[error("pack checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("corrupt delta: {0}")]
    CorruptDelta(String),

    #[error("delta chain depth {depth} exceeds limit {limit}")]
    DeltaChainTooDeep { depth: usize, limit: usize },

    #[error("delta base not found: {0}")]
    DeltaBaseNotFound(ObjectId),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("entry indexed as {expected} hashes to {actual}")]
    ObjectMismatch { expected: ObjectId, actual: ObjectId },

    #[error("CRC32 mismatch at offset {offset}")]
    CrcMismatch { offset: u64 },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("index does not pair with pack (checksum mismatch)")]
    IndexPairMismatch,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PackResult<T> = Result<T, PackError>;
