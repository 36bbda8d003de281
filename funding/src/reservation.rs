//! Order funding: inventory gate, single-order reservation, FIFO batch
//!
//! A reservation earmarks wallet funds for an order without decreasing
//! the balance. The write sequence for one order is:
//!
//! 1. **Inventory gate** - reserve every line's quantity with an
//!    optimistic increment; any shortfall parks the order
//!    `OnHoldCompliance` and releases the lines already taken.
//! 2. **Funds check** - `available = balance - reserved - compliance
//!    reserve`; a shortfall leaves the order `AwaitingFunds` and notifies
//!    the merchant with the missing amount.
//! 3. **Reservation** - `reserved += estimate`, guarded by the balance
//!    and reserved values just read. A lost race is
//!    [`ReservationOutcome::ReservationConflict`], retryable by the
//!    caller's policy.
//! 4. **Order claim** - conditional `AwaitingFunds → Funded` transition.
//!    A loser here undoes its reservation and inventory; the winner
//!    appends the Reservation ledger entry last.
//!
//! The batch pass replays a merchant's awaiting orders in strict FIFO by
//! creation time and stops at the first order the running available
//! total cannot cover - no skipping ahead to smaller orders.

use crate::{
    config::Config,
    error::{Error, Result},
    notify::{MerchantNotice, Notifier},
};
use chrono::Utc;
use ledger_store::{
    AuditKind, AuditLog, Currency, Metrics, Order, OrderStatus, Store, TransactionKind,
    TransactionReference, WalletTransaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Result of one single-order reservation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationOutcome {
    /// Funds reserved and the order moved to Funded
    Funded {
        /// The funded order
        order_id: Uuid,
        /// The appended Reservation ledger entry
        transaction_id: Uuid,
    },

    /// Available balance does not cover the estimate; order stays
    /// AwaitingFunds and the merchant is notified with the shortfall
    InsufficientFunds {
        /// The unfunded order
        order_id: Uuid,
        /// Amount the available balance fell short by
        shortfall_cents: i64,
    },

    /// Lost the wallet compare-and-swap to a concurrent writer;
    /// retryable by the caller's policy
    ReservationConflict,

    /// An order line could not be covered by inventory; the order is
    /// parked OnHoldCompliance for operator review
    InventoryShortfall {
        /// First product that fell short
        product_id: Uuid,
    },

    /// The order is no longer AwaitingFunds; nothing to do
    AlreadyHandled,
}

impl ReservationOutcome {
    /// Whether this call funded the order
    pub fn is_funded(&self) -> bool {
        matches!(self, ReservationOutcome::Funded { .. })
    }
}

/// Summary of one batch funding pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFundingSummary {
    /// Orders funded this pass
    pub funded: u32,

    /// Total estimate reserved this pass
    pub funded_cents: i64,

    /// Orders parked OnHoldCompliance by the inventory gate
    pub parked: u32,

    /// First order the running available total could not cover
    pub stopped_at: Option<Uuid>,
}

/// The reservation engine
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<Store>,
    audit: AuditLog,
    metrics: Metrics,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

impl ReservationEngine {
    /// Create the reservation engine
    pub fn new(
        store: Arc<Store>,
        audit: AuditLog,
        metrics: Metrics,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            store,
            audit,
            metrics,
            notifier,
            config,
        }
    }

    /// Attempt to reserve funds for one order and move it to Funded
    pub fn reserve_for_order(&self, order_id: Uuid) -> Result<ReservationOutcome> {
        let order = self
            .store
            .order(order_id)?
            .ok_or(Error::OrderNotFound(order_id))?;

        if order.status != OrderStatus::AwaitingFunds {
            return Ok(ReservationOutcome::AlreadyHandled);
        }

        // Inventory gate precedes any funds movement
        if let Some(product_id) = self.reserve_inventory(&order)? {
            let cas = self.store.update_order_where(
                order_id,
                |o| o.status == OrderStatus::AwaitingFunds,
                |o| o.status = OrderStatus::OnHoldCompliance,
            )?;
            if cas.applied() {
                tracing::warn!(%order_id, %product_id, "Order parked on inventory shortfall");
            }
            return Ok(ReservationOutcome::InventoryShortfall { product_id });
        }

        let estimate = order.total_estimate_cents;
        let wallet = match self.store.wallet(order.merchant_id, order.currency)? {
            Some(wallet) => wallet,
            None => {
                self.release_inventory(&order);
                self.notifier.notify_best_effort(
                    order.merchant_id,
                    &MerchantNotice::AwaitingFunds {
                        order_id,
                        shortfall_cents: estimate,
                    },
                );
                return Ok(ReservationOutcome::InsufficientFunds {
                    order_id,
                    shortfall_cents: estimate,
                });
            }
        };

        let reserve = self.config.compliance_reserves.for_currency(order.currency);
        let available = wallet.available_cents(reserve);
        if available < estimate {
            self.release_inventory(&order);
            let shortfall_cents = estimate - available;
            self.notifier.notify_best_effort(
                order.merchant_id,
                &MerchantNotice::AwaitingFunds {
                    order_id,
                    shortfall_cents,
                },
            );
            tracing::info!(%order_id, shortfall_cents, "Insufficient available balance");
            return Ok(ReservationOutcome::InsufficientFunds {
                order_id,
                shortfall_cents,
            });
        }

        // Reservation guarded by the values just read
        let (read_balance, read_reserved) = (wallet.balance_cents, wallet.reserved_cents);
        let cas = self.store.update_wallet_where(
            order.merchant_id,
            order.currency,
            |w| w.balance_cents == read_balance && w.reserved_cents == read_reserved,
            |w| w.reserved_cents += estimate,
        )?;
        if !cas.applied() {
            self.release_inventory(&order);
            self.metrics.reservation_conflicts_total.inc();
            return Ok(ReservationOutcome::ReservationConflict);
        }

        // Order claim serializes duplicate runs over the same order
        let funded_at = Utc::now();
        let cas = self.store.update_order_where(
            order_id,
            |o| o.status == OrderStatus::AwaitingFunds,
            |o| {
                o.status = OrderStatus::Funded;
                o.funded_at = Some(funded_at);
                o.wallet_id = Some(wallet.id);
            },
        )?;
        if !cas.applied() {
            // A duplicate run funded it between our read and claim
            self.store.update_wallet_where(
                order.merchant_id,
                order.currency,
                |_| true,
                |w| w.reserved_cents = (w.reserved_cents - estimate).max(0),
            )?;
            self.release_inventory(&order);
            return Ok(ReservationOutcome::AlreadyHandled);
        }

        let entry = WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: wallet.id,
            merchant_id: order.merchant_id,
            currency: order.currency,
            kind: TransactionKind::Reservation,
            amount_cents: -estimate,
            balance_after_cents: read_balance,
            reference: TransactionReference::Order(order_id),
            description: format!("Reservation for order {}", order_id),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        self.store.append_transaction(&entry)?;

        self.metrics.reservations_total.inc();
        self.notifier
            .notify_best_effort(order.merchant_id, &MerchantNotice::OrderFunded { order_id });
        tracing::info!(%order_id, estimate_cents = estimate, "Order funded");

        Ok(ReservationOutcome::Funded {
            order_id,
            transaction_id: entry.id,
        })
    }

    /// Fund a merchant's awaiting orders in strict FIFO by creation time
    ///
    /// Stops at the first order the running available total cannot
    /// cover; later, smaller orders are not considered.
    pub fn fund_awaiting_orders(
        &self,
        merchant_id: Uuid,
        currency: Currency,
    ) -> Result<BatchFundingSummary> {
        let mut summary = BatchFundingSummary::default();

        let wallet = match self.store.wallet(merchant_id, currency)? {
            Some(wallet) => wallet,
            None => return Ok(summary),
        };
        let reserve = self.config.compliance_reserves.for_currency(currency);
        let mut available = wallet.available_cents(reserve);

        for order in self.store.awaiting_funds_orders(merchant_id, currency)? {
            if order.total_estimate_cents > available {
                summary.stopped_at = Some(order.id);
                break;
            }
            match self.reserve_for_order(order.id)? {
                ReservationOutcome::Funded { .. } => {
                    summary.funded += 1;
                    summary.funded_cents += order.total_estimate_cents;
                    available -= order.total_estimate_cents;
                }
                ReservationOutcome::InventoryShortfall { .. } => {
                    // Parked orders leave the queue; the pass continues
                    summary.parked += 1;
                }
                ReservationOutcome::InsufficientFunds { .. } => {
                    // A concurrent writer drained the wallet under us
                    summary.stopped_at = Some(order.id);
                    break;
                }
                ReservationOutcome::ReservationConflict => {
                    // The next top-up or retry re-runs the pass
                    summary.stopped_at = Some(order.id);
                    break;
                }
                ReservationOutcome::AlreadyHandled => {}
            }
        }

        let mut details = BTreeMap::new();
        details.insert("merchant_id".to_string(), merchant_id.to_string());
        details.insert("currency".to_string(), currency.to_string());
        details.insert("funded".to_string(), summary.funded.to_string());
        details.insert("funded_cents".to_string(), summary.funded_cents.to_string());
        details.insert("parked".to_string(), summary.parked.to_string());
        if let Some(stopped) = summary.stopped_at {
            details.insert("stopped_at".to_string(), stopped.to_string());
        }
        self.audit.append_best_effort(
            AuditKind::BatchFundingSummary,
            format!("Batch funding pass for merchant {}", merchant_id),
            details,
        );

        Ok(summary)
    }

    /// Reserve inventory for every line; returns the first product that
    /// falls short, after releasing the lines already taken
    fn reserve_inventory(&self, order: &Order) -> Result<Option<Uuid>> {
        let mut taken: Vec<(Uuid, u32)> = Vec::new();
        for line in &order.lines {
            let cas = self.store.update_inventory_where(
                line.product_id,
                |i| i.sellable() >= line.quantity,
                |i| i.reserved += line.quantity,
            )?;
            if !cas.applied() {
                self.release_lines(&taken);
                return Ok(Some(line.product_id));
            }
            taken.push((line.product_id, line.quantity));
        }
        Ok(None)
    }

    /// Release every line reservation taken for an order
    fn release_inventory(&self, order: &Order) {
        let lines: Vec<(Uuid, u32)> = order
            .lines
            .iter()
            .map(|l| (l.product_id, l.quantity))
            .collect();
        self.release_lines(&lines);
    }

    fn release_lines(&self, lines: &[(Uuid, u32)]) {
        for (product_id, quantity) in lines {
            let result = self.store.update_inventory_where(
                *product_id,
                |_| true,
                |i| i.reserved = i.reserved.saturating_sub(*quantity),
            );
            if let Err(e) = result {
                tracing::warn!(%product_id, "Inventory release failed: {}", e);
            }
        }
    }
}
