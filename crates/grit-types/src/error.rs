use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("malformed identity line: {0}")]
    MalformedIdent(String),
}
