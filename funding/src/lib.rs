//! FundRail Funding Engines
//!
//! The ledger-mutating core of the merchant wallet: crediting, order
//! funding and settlement.
//!
//! # Architecture
//!
//! 1. **Crediting** ([`WalletCrediting`]): the single choke-point that
//!    increases a balance, shared by the deposit watcher and invoice
//!    sync. An idempotency claim on the source record serializes
//!    concurrent attempts.
//! 2. **Reservation** ([`ReservationEngine`]): earmarks wallet funds for
//!    an order after the inventory gate passes, and replays awaiting
//!    orders in strict FIFO when a top-up lands.
//! 3. **Settlement** ([`SettlementEngine`]): at shipment, releases the
//!    reservation and applies the actual cost to the balance.
//! 4. **Reconciliation** ([`ReconciliationSweep`]): repairs the gap a
//!    crash can leave between an idempotency claim and its ledger entry.
//!
//! Ledger-mutating paths never partially apply: each either completes
//! its write sequence or rolls back the claim it took. Notifications and
//! audit inserts are best-effort and never block a commit.

#![forbid(unsafe_code)]

pub mod config;
pub mod crediting;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod reservation;
pub mod settlement;
pub mod workflows;

// Re-exports
pub use config::{ComplianceReserves, Config};
pub use crediting::{CreditOutcome, CreditSource, WalletCrediting};
pub use error::{Error, Result};
pub use notify::{MerchantNotice, Notifier, NoopNotifier, NotifyError, RecordingNotifier};
pub use reconcile::{ReconciliationSummary, ReconciliationSweep};
pub use reservation::{BatchFundingSummary, ReservationEngine, ReservationOutcome};
pub use settlement::{SettlementEngine, SettlementOutcome, ShipmentDetails};
