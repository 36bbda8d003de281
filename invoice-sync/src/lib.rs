//! FundRail Invoice Sync
//!
//! Fiat top-up intake for the merchant wallet: invoice creation when a
//! wallet's available balance falls under its threshold, and the status
//! lifecycle sync (`Unpaid → Processing → Paid | Cancelled`) that feeds
//! paid invoices into the funding choke-point.
//!
//! The designed asymmetry: only **Paid** credits. Processing payments
//! are initiated but still reversible, so they update local status only
//! and can never fund an order.

#![forbid(unsafe_code)]

pub mod error;
pub mod provider;
pub mod sync;

// Re-exports
pub use error::{Error, Result};
pub use provider::{
    cents_to_decimal, parse_amount_cents, CreatedInvoice, InvoicingProvider, MercuryClient,
    ProviderStatus,
};
pub use sync::{InvoiceSync, SyncConfig, SyncSummary};
