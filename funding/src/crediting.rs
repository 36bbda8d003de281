//! Wallet crediting, the single choke-point that increases a balance
//!
//! Both the deposit watcher and invoice sync credit through
//! [`WalletCrediting::credit`]. The write sequence is:
//!
//! 1. **Claim** - conditionally flip the source record's idempotency
//!    marker (invoice `wallet_credited` false→true, deposit
//!    Confirmed→Credited). A stale claim means another run already took
//!    it; the caller gets [`CreditOutcome::AlreadyClaimed`], a benign
//!    no-op.
//! 2. **Locate wallet** - a missing wallet rolls the claim back so the
//!    source stays creditable on a future run.
//! 3. **Balance update** - compare-and-swap guarded by the balance read
//!    in step 2; a lost race also rolls the claim back.
//! 4. **Ledger entry** - append the wallet transaction with the
//!    post-credit balance snapshot and link its id onto the source.
//!
//! The claim in step 1 is the serialization point: for a given source
//! record the sequence runs to completion at most once system-wide. A
//! crash between steps 2 and 4 leaves the source claimed without a
//! linked ledger entry; the reconciliation sweep picks those up.

use crate::error::{Error, Result};
use chrono::Utc;
use ledger_store::{
    AddressPurpose, CasOutcome, Currency, DepositKey, DepositStatus, Metrics, Store,
    TransactionKind, TransactionReference, WalletTransaction,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The external record a credit is sourced from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditSource {
    /// A fiat top-up invoice reported paid
    Invoice(Uuid),

    /// A confirmed on-chain deposit
    Deposit(DepositKey),
}

impl fmt::Display for CreditSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditSource::Invoice(id) => write!(f, "invoice:{}", id),
            CreditSource::Deposit(key) => write!(f, "deposit:{}", key),
        }
    }
}

/// Result of one credit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditOutcome {
    /// The wallet was credited and the ledger entry written
    Credited {
        /// The appended ledger entry
        transaction_id: Uuid,
        /// Balance after the credit
        balance_after_cents: i64,
    },

    /// Another run already claimed this source; nothing to do
    AlreadyClaimed,

    /// No wallet for (merchant, currency); claim rolled back
    WalletMissing,

    /// The balance changed between read and update; claim rolled back
    BalanceConflict,
}

impl CreditOutcome {
    /// Whether the balance was incremented by this call
    pub fn is_credited(&self) -> bool {
        matches!(self, CreditOutcome::Credited { .. })
    }

    /// Whether a future run can retry this source
    ///
    /// Both variants roll the claim back before returning, so the source
    /// record is back in its pre-credit state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CreditOutcome::WalletMissing | CreditOutcome::BalanceConflict
        )
    }
}

/// What a successful claim establishes about the source
struct Claim {
    kind: TransactionKind,
    reference: TransactionReference,
    description: String,
}

/// The crediting choke-point
#[derive(Clone)]
pub struct WalletCrediting {
    store: Arc<Store>,
    metrics: Metrics,
}

impl WalletCrediting {
    /// Create the crediting engine
    pub fn new(store: Arc<Store>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Credit `amount_cents` to the (merchant, currency) wallet, at most
    /// once per source record system-wide
    pub fn credit(
        &self,
        merchant_id: Uuid,
        currency: Currency,
        amount_cents: i64,
        source: &CreditSource,
    ) -> Result<CreditOutcome> {
        // Step 1: claim the source record
        let claim = match self.claim(source)? {
            Some(claim) => claim,
            None => {
                tracing::debug!(%source, "Credit already claimed by another run");
                self.metrics.wallet_credit_noops_total.inc();
                return Ok(CreditOutcome::AlreadyClaimed);
            }
        };

        // Step 2: locate the wallet
        let wallet = match self.store.wallet(merchant_id, currency)? {
            Some(wallet) => wallet,
            None => {
                self.release_claim(source)?;
                tracing::warn!(
                    %merchant_id,
                    %currency,
                    %source,
                    "Wallet missing at credit time; claim released for retry"
                );
                return Ok(CreditOutcome::WalletMissing);
            }
        };

        // Step 3: balance update guarded by the balance just read
        let read_balance = wallet.balance_cents;
        let cas = self.store.update_wallet_where(
            merchant_id,
            currency,
            |w| w.balance_cents == read_balance,
            |w| w.balance_cents += amount_cents,
        )?;
        if !cas.applied() {
            self.release_claim(source)?;
            tracing::debug!(%source, "Lost balance race; claim released for retry");
            return Ok(CreditOutcome::BalanceConflict);
        }

        // Step 4: ledger entry, then link it onto the source
        let balance_after_cents = read_balance + amount_cents;
        let entry = WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: wallet.id,
            merchant_id,
            currency,
            kind: claim.kind,
            amount_cents,
            balance_after_cents,
            reference: claim.reference,
            description: claim.description,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        self.store.append_transaction(&entry)?;
        self.link_back(source, entry.id)?;

        self.metrics.wallet_credits_total.inc();
        tracing::info!(
            %merchant_id,
            %currency,
            amount_cents,
            balance_after_cents,
            %source,
            "Wallet credited"
        );

        Ok(CreditOutcome::Credited {
            transaction_id: entry.id,
            balance_after_cents,
        })
    }

    /// Flip the source's idempotency marker; `None` means already taken
    fn claim(&self, source: &CreditSource) -> Result<Option<Claim>> {
        match source {
            CreditSource::Invoice(id) => {
                let invoice = self
                    .store
                    .invoice(*id)?
                    .ok_or(Error::InvoiceNotFound(*id))?;
                let cas = self.store.update_invoice_where(
                    *id,
                    |i| !i.wallet_credited,
                    |i| i.wallet_credited = true,
                )?;
                match cas {
                    CasOutcome::Applied => Ok(Some(Claim {
                        kind: TransactionKind::Topup,
                        reference: TransactionReference::Invoice(*id),
                        description: format!("Top-up invoice {} paid", invoice.number),
                    })),
                    CasOutcome::Stale => Ok(None),
                    CasOutcome::Missing => Err(Error::InvoiceNotFound(*id)),
                }
            }
            CreditSource::Deposit(key) => {
                let deposit = self
                    .store
                    .deposit(key)?
                    .ok_or_else(|| Error::DepositNotFound(key.to_string()))?;
                let kind = match deposit.purpose {
                    AddressPurpose::Topup => TransactionKind::BtcDepositTopup,
                    AddressPurpose::Tip => TransactionKind::BtcDepositTip,
                };
                let cas = self.store.update_deposit_where(
                    key,
                    |d| d.status == DepositStatus::Confirmed,
                    |d| d.status = DepositStatus::Credited,
                )?;
                match cas {
                    CasOutcome::Applied => Ok(Some(Claim {
                        kind,
                        reference: TransactionReference::Deposit(key.clone()),
                        description: format!("BTC deposit {} credited", key),
                    })),
                    CasOutcome::Stale => Ok(None),
                    CasOutcome::Missing => Err(Error::DepositNotFound(key.to_string())),
                }
            }
        }
    }

    /// Undo a claim so the source is creditable again on a future run
    fn release_claim(&self, source: &CreditSource) -> Result<()> {
        match source {
            CreditSource::Invoice(id) => {
                self.store.update_invoice_where(
                    *id,
                    |i| i.wallet_credited,
                    |i| i.wallet_credited = false,
                )?;
            }
            CreditSource::Deposit(key) => {
                self.store.update_deposit_where(
                    key,
                    |d| d.status == DepositStatus::Credited,
                    |d| d.status = DepositStatus::Confirmed,
                )?;
            }
        }
        Ok(())
    }

    /// Record the ledger entry id on the source record
    fn link_back(&self, source: &CreditSource, transaction_id: Uuid) -> Result<()> {
        match source {
            CreditSource::Invoice(id) => {
                self.store.update_invoice_where(
                    *id,
                    |_| true,
                    |i| i.wallet_transaction_id = Some(transaction_id),
                )?;
            }
            CreditSource::Deposit(key) => {
                self.store.update_deposit_where(
                    key,
                    |_| true,
                    |d| d.wallet_transaction_id = Some(transaction_id),
                )?;
            }
        }
        Ok(())
    }
}
