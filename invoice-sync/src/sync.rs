//! Top-up invoice lifecycle sync
//!
//! For every open, uncredited invoice the provider is polled and the
//! local row follows its status:
//!
//! - **Paid** - credit through the funding choke-point first; only when
//!   the credit lands (or was already claimed) does the local status
//!   move to Paid, and a resume event replays the merchant's awaiting
//!   orders.
//! - **Processing / Cancelled** - local status only. Processing must
//!   never credit; an initiated payment can still be reversed.
//! - anything else - no-op.
//!
//! One invoice's failure is caught per-invoice and the batch continues;
//! the run summary lands in the audit trail. Invoice creation tops a
//! wallet up when its available balance falls under the threshold and
//! no open invoice exists for it.

use crate::{
    error::{Error, Result},
    provider::{InvoicingProvider, ProviderStatus},
};
use chrono::Utc;
use funding::{
    ComplianceReserves, CreditOutcome, CreditSource, MerchantNotice, Notifier, WalletCrediting,
};
use ledger_store::{
    AuditKind, AuditLog, Currency, InvoiceStatus, MercuryInvoice, Metrics, Store,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use workflow::{Event, EventSink};

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Available balance below which a top-up invoice is created
    pub topup_threshold_cents: i64,

    /// Face amount of a created top-up invoice
    pub topup_amount_cents: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            topup_threshold_cents: 100_000,
            topup_amount_cents: 500_000,
        }
    }
}

/// Summary of one sync cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Invoices polled
    pub checked: u32,

    /// Invoices that transitioned to Paid and credited
    pub paid: u32,

    /// Total credited this cycle
    pub credited_cents: i64,

    /// Invoices that moved to Processing
    pub processing: u32,

    /// Invoices that were cancelled upstream
    pub cancelled: u32,

    /// Top-up invoices created for under-threshold wallets
    pub created: u32,

    /// Per-invoice failures, collected not thrown
    pub errors: Vec<String>,
}

enum Transition {
    Paid,
    Processing,
    Cancelled,
    None,
}

/// The invoice sync engine
pub struct InvoiceSync {
    store: Arc<Store>,
    audit: AuditLog,
    metrics: Metrics,
    provider: Arc<dyn InvoicingProvider>,
    crediting: WalletCrediting,
    notifier: Arc<dyn Notifier>,
    sink: Arc<dyn EventSink>,
    reserves: ComplianceReserves,
    config: SyncConfig,
}

impl InvoiceSync {
    /// Create the sync engine
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        audit: AuditLog,
        metrics: Metrics,
        provider: Arc<dyn InvoicingProvider>,
        crediting: WalletCrediting,
        notifier: Arc<dyn Notifier>,
        sink: Arc<dyn EventSink>,
        reserves: ComplianceReserves,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            audit,
            metrics,
            provider,
            crediting,
            notifier,
            sink,
            reserves,
            config,
        }
    }

    /// Poll every open, uncredited invoice and follow its status
    pub async fn sync_open_invoices(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        let open = self
            .store
            .invoices(|i| i.status.is_open() && !i.wallet_credited)?;

        for invoice in open {
            summary.checked += 1;
            match self.sync_one(&invoice).await {
                Ok(Transition::Paid) => {
                    summary.paid += 1;
                    summary.credited_cents += invoice.amount_cents;
                    self.metrics.invoices_synced_total.inc();
                }
                Ok(Transition::Processing) => {
                    summary.processing += 1;
                    self.metrics.invoices_synced_total.inc();
                }
                Ok(Transition::Cancelled) => {
                    summary.cancelled += 1;
                    self.metrics.invoices_synced_total.inc();
                }
                Ok(Transition::None) => {}
                Err(e) => {
                    tracing::warn!(invoice_id = %invoice.id, "Invoice sync failed: {}", e);
                    summary.errors.push(format!("{}: {}", invoice.id, e));
                }
            }
        }

        let mut details = BTreeMap::new();
        details.insert("checked".to_string(), summary.checked.to_string());
        details.insert("paid".to_string(), summary.paid.to_string());
        details.insert("credited_cents".to_string(), summary.credited_cents.to_string());
        details.insert("processing".to_string(), summary.processing.to_string());
        details.insert("cancelled".to_string(), summary.cancelled.to_string());
        details.insert("errors".to_string(), summary.errors.len().to_string());
        self.audit.append_best_effort(
            AuditKind::InvoiceSyncSummary,
            "Invoice sync cycle",
            details,
        );

        Ok(summary)
    }

    async fn sync_one(&self, invoice: &MercuryInvoice) -> Result<Transition> {
        let status = self.provider.invoice_status(&invoice.external_id).await?;

        match status {
            ProviderStatus::Paid => {
                let outcome = self.crediting.credit(
                    invoice.merchant_id,
                    invoice.currency,
                    invoice.amount_cents,
                    &CreditSource::Invoice(invoice.id),
                )?;
                match outcome {
                    CreditOutcome::Credited { .. } | CreditOutcome::AlreadyClaimed => {
                        // Local status moves only once the credit holds
                        self.store.update_invoice_where(
                            invoice.id,
                            |i| i.status.is_open(),
                            |i| i.status = InvoiceStatus::Paid,
                        )?;
                        if outcome.is_credited() {
                            self.notifier.notify_best_effort(
                                invoice.merchant_id,
                                &MerchantNotice::PaymentReceived {
                                    invoice_id: invoice.id,
                                    amount_cents: invoice.amount_cents,
                                },
                            );
                            self.sink.send(Event::new(
                                "top-up-credited",
                                json!({
                                    "merchant_id": invoice.merchant_id,
                                    "currency": invoice.currency.code(),
                                }),
                            ));
                            tracing::info!(
                                invoice_id = %invoice.id,
                                amount_cents = invoice.amount_cents,
                                "Invoice paid and credited"
                            );
                        }
                        Ok(Transition::Paid)
                    }
                    CreditOutcome::WalletMissing | CreditOutcome::BalanceConflict => {
                        // Claim was rolled back; the next run retries
                        Err(Error::CreditRetryable(format!("{:?}", outcome)))
                    }
                }
            }
            ProviderStatus::Processing => {
                // Initiated payments never credit
                self.store.update_invoice_where(
                    invoice.id,
                    |i| i.status == InvoiceStatus::Unpaid,
                    |i| i.status = InvoiceStatus::Processing,
                )?;
                Ok(Transition::Processing)
            }
            ProviderStatus::Cancelled => {
                self.store.update_invoice_where(
                    invoice.id,
                    |i| i.status.is_open(),
                    |i| i.status = InvoiceStatus::Cancelled,
                )?;
                Ok(Transition::Cancelled)
            }
            ProviderStatus::Unpaid | ProviderStatus::Unknown => Ok(Transition::None),
        }
    }

    /// Create top-up invoices for fiat wallets under the threshold
    ///
    /// Skips wallets that already have an open invoice.
    pub async fn ensure_topup_invoices(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        let wallets = self.store.wallets(|w| w.currency != Currency::Btc)?;
        for wallet in wallets {
            let available = wallet.available_cents(self.reserves.for_currency(wallet.currency));
            if available >= self.config.topup_threshold_cents {
                continue;
            }

            let has_open = !self
                .store
                .invoices(|i| {
                    i.merchant_id == wallet.merchant_id
                        && i.currency == wallet.currency
                        && i.status.is_open()
                })?
                .is_empty();
            if has_open {
                continue;
            }

            match self
                .provider
                .create_invoice(
                    wallet.merchant_id,
                    self.config.topup_amount_cents,
                    wallet.currency,
                    "Wallet top-up",
                )
                .await
            {
                Ok(created) => {
                    let now = Utc::now();
                    let invoice = MercuryInvoice {
                        id: Uuid::new_v4(),
                        merchant_id: wallet.merchant_id,
                        currency: wallet.currency,
                        amount_cents: self.config.topup_amount_cents,
                        external_id: created.external_id,
                        number: created.number,
                        pay_url: created.pay_url,
                        status: InvoiceStatus::Unpaid,
                        wallet_credited: false,
                        wallet_transaction_id: None,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.insert_invoice(&invoice)?;
                    summary.created += 1;
                    tracing::info!(
                        merchant_id = %wallet.merchant_id,
                        available_cents = available,
                        "Top-up invoice created"
                    );
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("create for {}: {}", wallet.merchant_id, e));
                }
            }
        }

        Ok(summary)
    }
}
