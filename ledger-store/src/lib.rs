//! FundRail Ledger Store
//!
//! Relational-style tables for the merchant wallet ledger, backed by
//! RocksDB column families.
//!
//! # Architecture
//!
//! - **Append-only ledger**: `wallet_transactions` rows are immutable; the
//!   wallet balance is denormalized state kept in sync by the writer that
//!   appends the ledger row
//! - **Conditional updates**: every mutation that must not double-apply
//!   goes through the [`Store`]'s `update_*_where` compare-and-swap
//!   methods; a failed condition means another writer got there first
//! - **Natural keys**: external events are keyed by their natural identity
//!   (txid:vout for deposits) so duplicate delivery is a no-op
//!
//! # Invariants
//!
//! - `reserved_cents` never goes negative
//! - A wallet transaction row is written at most once per external event
//! - Audit entries form an unbroken hash chain

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod audit;
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod types;

// Re-exports
pub use audit::{AuditEntry, AuditKind, AuditLog};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use store::{CasOutcome, Store};
pub use types::{
    AddressPurpose, AddressStatus, BtcAddress, BtcDeposit, Currency, DepositKey, DepositStatus,
    InventoryItem, InvoiceStatus, MercuryInvoice, Order, OrderLine, OrderStatus,
    TransactionKind, TransactionReference, WalletAccount, WalletTransaction,
};
