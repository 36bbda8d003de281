//! Error types for the funding engines

use ledger_store::OrderStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for funding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Funding errors
///
/// Benign concurrency outcomes (lost claims, lost reservations) are not
/// errors; they are variants of the operation's outcome enum. Everything
/// here either aborts one entity's processing or fails the workflow run.
#[derive(Error, Debug)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] ledger_store::Error),

    /// Order referenced by an event does not exist
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Order is in a state the operation cannot proceed from
    #[error("Order {id} not settleable from status {status:?}")]
    OrderNotSettleable {
        /// Order id
        id: Uuid,
        /// Status the order was found in
        status: OrderStatus,
    },

    /// Wallet row vanished mid-operation
    #[error("Wallet not found for merchant {0}")]
    WalletNotFound(Uuid),

    /// Invoice referenced by a credit does not exist
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    /// Deposit referenced by a credit does not exist
    #[error("Deposit not found: {0}")]
    DepositNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
