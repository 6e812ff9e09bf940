use thiserror::Error;

use grit_pack::PackError;
use grit_refs::RefError;
use grit_revwalk::WalkError;
use grit_store::StoreError;
use grit_types::ObjectId;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("pkt-line payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("object {0} is referenced but not present")]
    MissingObject(ObjectId),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
