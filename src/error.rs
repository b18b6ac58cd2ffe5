//! Error taxonomy for ledger and redemption operations

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },
    #[error("unauthorized: expected {expected}, got {got}")]
    Unauthorized { expected: String, got: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<minicbor::decode::Error> for LedgerError {
    fn from(value: minicbor::decode::Error) -> Self {
        LedgerError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LedgerError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        LedgerError::Codec(value.to_string())
    }
}
