//! State storage errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transactions are not supported by this backend")]
    TransactionsUnsupported,

    #[error("Store is closed")]
    Closed,
}
