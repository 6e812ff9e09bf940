use thiserror::Error;

use grit_types::ObjectId;

#[derive(Debug, Error)]
pub enum RefError {
    #[error("stale ref {name}: expected {expected:?}, found {actual:?}")]
    StaleRef {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("invalid ref name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RefResult<T> = Result<T, RefError>;
