//! Error types for invoice sync

use thiserror::Error;

/// Result type for invoice sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invoice sync errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invoicing provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Amount string the provider sent cannot be converted exactly
    #[error("Invalid amount: {0}")]
    Amount(String),

    /// Credit was rolled back and stays retryable on a future run
    #[error("Credit not applied, retryable: {0}")]
    CreditRetryable(String),

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
