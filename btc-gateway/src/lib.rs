//! FundRail BTC Gateway
//!
//! On-chain deposit intake for the merchant wallet: deterministic
//! receiving-address derivation, allocation and rotation, and the
//! deposit watcher that feeds confirmed deposits into the funding
//! choke-point.
//!
//! # Architecture
//!
//! - **Derivation** ([`derive_address`]): pure BIP84-style derivation
//!   over normalized extended public keys; no private-key material
//! - **Allocation** ([`AddressAllocator`]): derivation indices claimed
//!   from a shared per-purpose counter by compare-and-swap
//! - **Watching** ([`DepositWatcher`]): per-deposit state machine keyed
//!   by (txid, vout), with confirmation tracking and reorg flagging
//!
//! Two watcher runs may poll concurrently; the (txid, vout) natural key
//! and the store's conditional updates make the overlap benign.

#![forbid(unsafe_code)]

pub mod addresses;
pub mod chain;
pub mod config;
pub mod derive;
pub mod error;
pub mod watcher;

// Re-exports
pub use addresses::AddressAllocator;
pub use chain::{AddressTransaction, ChainDataProvider, EsploraClient, TxOutputInfo};
pub use config::Config;
pub use derive::{derive_address, normalize_extended_key};
pub use error::{Error, Result};
pub use watcher::{DepositWatcher, PollSummary};
