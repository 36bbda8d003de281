//! Error types for the ledger store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wallet not found for (merchant, currency)
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Audit chain integrity failure
    #[error("Audit chain broken: {0}")]
    AuditIntegrity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
