use thiserror::Error;

use grit_store::StoreError;
use grit_types::ObjectId;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("commit not found: {0}")]
    MissingCommit(ObjectId),

    #[error("object {id} is a {kind}, not a commit")]
    NotACommit { id: ObjectId, kind: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type WalkResult<T> = Result<T, WalkError>;
