use thiserror::Error;

use grit_types::ObjectId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    #[error("malformed {kind} payload: {reason}")]
    MalformedObject { kind: String, reason: String },

    #[error("refusing to store object with null id")]
    NullObjectId,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
