//! Error types for the BTC gateway

use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Extended public key carries a prefix we do not accept
    #[error("Unsupported extended key format: {0}")]
    UnsupportedKeyFormat(String),

    /// Key parsing or child derivation failed
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    /// Chain data provider failure
    #[error("Chain provider error: {0}")]
    Provider(String),

    /// Derivation counter kept losing its compare-and-swap
    #[error("Derivation counter contention for {0}")]
    CounterContention(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] ledger_store::Error),

    /// Funding engine error
    #[error("Funding error: {0}")]
    Funding(#[from] funding::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Provider(err.to_string())
    }
}
