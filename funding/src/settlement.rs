//! Shipment settlement: reconcile estimated vs actual cost
//!
//! On shipment, the order's reservation (taken against the estimate) is
//! released and the balance decreases by the actual cost. The write
//! sequence:
//!
//! 1. **Order claim** - conditional `Funded → Shipped` transition that
//!    records the actual total. Duplicate runs lose the claim and see
//!    [`SettlementOutcome::AlreadyHandled`].
//! 2. **Wallet adjustment** - one atomic mutation: release the original
//!    reservation floored at zero and apply the actual-total decrease.
//! 3. **Ledger entry** - append the Settlement entry for `-actual`.
//! 4. **Inventory** - consume the shipped quantities.
//!
//! The tracking notification event for the storefront is queued only
//! after the ledger write commits.

use crate::error::{Error, Result};
use chrono::Utc;
use ledger_store::{
    Metrics, OrderStatus, Store, TransactionKind, TransactionReference, WalletTransaction,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use workflow::{Event, EventSink};

/// Shipment facts supplied by the fulfillment collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    /// Actual shipping cost in minor units
    pub actual_shipping_cents: i64,

    /// Carrier name
    pub carrier: String,

    /// Carrier tracking number
    pub tracking_number: String,
}

/// Result of one settlement attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// The order settled and shipped
    Settled {
        /// The appended Settlement ledger entry
        transaction_id: Uuid,
        /// Final cost charged to the wallet
        actual_total_cents: i64,
        /// Reservation amount released
        released_cents: i64,
    },

    /// The order was already shipped by another run
    AlreadyHandled,
}

/// The settlement engine
pub struct SettlementEngine {
    store: Arc<Store>,
    metrics: Metrics,
    sink: Arc<dyn EventSink>,
}

impl SettlementEngine {
    /// Create the settlement engine
    pub fn new(store: Arc<Store>, metrics: Metrics, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            metrics,
            sink,
        }
    }

    /// Settle one shipped order
    pub fn settle(&self, order_id: Uuid, shipment: &ShipmentDetails) -> Result<SettlementOutcome> {
        let order = self
            .store
            .order(order_id)?
            .ok_or(Error::OrderNotFound(order_id))?;

        match order.status {
            OrderStatus::Funded => {}
            OrderStatus::Shipped => return Ok(SettlementOutcome::AlreadyHandled),
            status => {
                // Shipping an unfunded order must never settle
                return Err(Error::OrderNotSettleable {
                    id: order_id,
                    status,
                });
            }
        }

        let line_total: i64 = order.lines.iter().map(|l| l.total_cents()).sum();
        let actual_total_cents = line_total + shipment.actual_shipping_cents;
        let estimate = order.total_estimate_cents;

        // Claim the order; the loser of a duplicate run stops here
        let cas = self.store.update_order_where(
            order_id,
            |o| o.status == OrderStatus::Funded,
            |o| {
                o.status = OrderStatus::Shipped;
                o.actual_total_cents = Some(actual_total_cents);
            },
        )?;
        if !cas.applied() {
            return Ok(SettlementOutcome::AlreadyHandled);
        }

        // Release the reservation (floored at zero) and charge the
        // actual cost in one atomic mutation
        let mut released_cents = 0;
        let mut balance_after_cents = 0;
        let cas = self.store.update_wallet_where(
            order.merchant_id,
            order.currency,
            |_| true,
            |w| {
                released_cents = w.reserved_cents.min(estimate);
                w.reserved_cents -= released_cents;
                w.balance_cents -= actual_total_cents;
                balance_after_cents = w.balance_cents;
            },
        )?;
        if !cas.applied() {
            // Order is claimed but the wallet row is gone; surface to
            // the step retry and leave the claim for the audit trail
            return Err(Error::WalletNotFound(order.merchant_id));
        }

        let entry = WalletTransaction {
            id: Uuid::now_v7(),
            wallet_id: order.wallet_id.unwrap_or_default(),
            merchant_id: order.merchant_id,
            currency: order.currency,
            kind: TransactionKind::Settlement,
            amount_cents: -actual_total_cents,
            balance_after_cents,
            reference: TransactionReference::Order(order_id),
            description: format!(
                "Settlement for order {} shipped via {}",
                order_id, shipment.carrier
            ),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        self.store.append_transaction(&entry)?;

        // Consume the shipped quantities
        for line in &order.lines {
            let result = self.store.update_inventory_where(
                line.product_id,
                |_| true,
                |i| {
                    i.on_hand = i.on_hand.saturating_sub(line.quantity);
                    i.reserved = i.reserved.saturating_sub(line.quantity);
                },
            );
            match result {
                Ok(cas) if !cas.applied() => {
                    tracing::warn!(product_id = %line.product_id, "Inventory row missing at settlement");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(product_id = %line.product_id, "Inventory consume failed: {}", e);
                }
            }
        }

        self.metrics.settlements_total.inc();
        tracing::info!(
            %order_id,
            estimate_cents = estimate,
            actual_total_cents,
            released_cents,
            "Order settled"
        );

        // Queued only after the ledger write committed
        self.sink.send(Event::new(
            "tracking-notification",
            json!({
                "order_id": order_id,
                "carrier": shipment.carrier,
                "tracking_number": shipment.tracking_number,
            }),
        ));

        Ok(SettlementOutcome::Settled {
            transaction_id: entry.id,
            actual_total_cents,
            released_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_store::{Currency, InventoryItem, Order, OrderLine};
    use tempfile::TempDir;
    use workflow::MemorySink;

    struct Setup {
        store: Arc<Store>,
        engine: SettlementEngine,
        sink: Arc<MemorySink>,
        _temp: TempDir,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let mut config = ledger_store::Config::default();
        config.data_dir = temp.path().to_path_buf();
        let store = Arc::new(Store::open(&config).unwrap());
        let sink = Arc::new(MemorySink::new());
        let engine = SettlementEngine::new(store.clone(), Metrics::new().unwrap(), sink.clone());
        Setup {
            store,
            engine,
            sink,
            _temp: temp,
        }
    }

    fn funded_order(
        store: &Store,
        merchant_id: Uuid,
        estimate_cents: i64,
        line_total_cents: i64,
    ) -> Order {
        let wallet = store.create_wallet(merchant_id, Currency::Usd).unwrap();
        store
            .update_wallet_where(merchant_id, Currency::Usd, |_| true, |w| {
                w.balance_cents = 5_000;
                w.reserved_cents = estimate_cents;
            })
            .unwrap();

        let product_id = Uuid::new_v4();
        store
            .put_inventory(&InventoryItem {
                product_id,
                on_hand: 10,
                reserved: 2,
            })
            .unwrap();

        let order = Order {
            id: Uuid::new_v4(),
            merchant_id,
            currency: Currency::Usd,
            lines: vec![OrderLine {
                product_id,
                quantity: 2,
                unit_price_cents: line_total_cents / 2,
            }],
            total_estimate_cents: estimate_cents,
            actual_total_cents: None,
            status: OrderStatus::Funded,
            wallet_id: Some(wallet.id),
            funded_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_order(&order).unwrap();
        order
    }

    #[test]
    fn test_settlement_symmetry() {
        let s = setup();
        let merchant = Uuid::new_v4();
        // Estimated 1000; lines total 600, shipping 200 → actual 800
        let order = funded_order(&s.store, merchant, 1_000, 600);

        let shipment = ShipmentDetails {
            actual_shipping_cents: 200,
            carrier: "UPS".to_string(),
            tracking_number: "1Z999".to_string(),
        };
        let outcome = s.engine.settle(order.id, &shipment).unwrap();

        match outcome {
            SettlementOutcome::Settled {
                actual_total_cents,
                released_cents,
                ..
            } => {
                assert_eq!(actual_total_cents, 800);
                assert_eq!(released_cents, 1_000);
            }
            other => panic!("expected settled, got {:?}", other),
        }

        // Net balance decrease is the actual cost, not the estimate
        let wallet = s.store.wallet(merchant, Currency::Usd).unwrap().unwrap();
        assert_eq!(wallet.balance_cents, 4_200);
        assert_eq!(wallet.reserved_cents, 0);

        let entries = s.store.transactions(|_| true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionKind::Settlement);
        assert_eq!(entries[0].amount_cents, -800);

        let stored = s.store.order(order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Shipped);
        assert_eq!(stored.actual_total_cents, Some(800));

        // Tracking event queued after commit
        let events = s.sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "tracking-notification");
    }

    #[test]
    fn test_duplicate_settlement_is_noop() {
        let s = setup();
        let merchant = Uuid::new_v4();
        let order = funded_order(&s.store, merchant, 500, 400);

        let shipment = ShipmentDetails {
            actual_shipping_cents: 50,
            carrier: "USPS".to_string(),
            tracking_number: "94001".to_string(),
        };
        assert!(matches!(
            s.engine.settle(order.id, &shipment).unwrap(),
            SettlementOutcome::Settled { .. }
        ));
        assert_eq!(
            s.engine.settle(order.id, &shipment).unwrap(),
            SettlementOutcome::AlreadyHandled
        );

        // Exactly one ledger entry and one balance decrease
        let entries = s.store.transactions(|_| true).unwrap();
        assert_eq!(entries.len(), 1);
        let wallet = s.store.wallet(merchant, Currency::Usd).unwrap().unwrap();
        assert_eq!(wallet.balance_cents, 5_000 - 450);
    }

    #[test]
    fn test_release_floored_at_zero() {
        let s = setup();
        let merchant = Uuid::new_v4();
        let order = funded_order(&s.store, merchant, 1_000, 600);
        // Simulate a stale-balance interleaving that left reserved low
        s.store
            .update_wallet_where(merchant, Currency::Usd, |_| true, |w| {
                w.reserved_cents = 300
            })
            .unwrap();

        let shipment = ShipmentDetails {
            actual_shipping_cents: 0,
            carrier: "UPS".to_string(),
            tracking_number: "1Z000".to_string(),
        };
        let outcome = s.engine.settle(order.id, &shipment).unwrap();

        match outcome {
            SettlementOutcome::Settled { released_cents, .. } => {
                assert_eq!(released_cents, 300)
            }
            other => panic!("expected settled, got {:?}", other),
        }
        let wallet = s.store.wallet(merchant, Currency::Usd).unwrap().unwrap();
        assert_eq!(wallet.reserved_cents, 0);
    }

    #[test]
    fn test_unfunded_order_never_settles() {
        let s = setup();
        let merchant = Uuid::new_v4();
        let order = funded_order(&s.store, merchant, 500, 400);
        s.store
            .update_order_where(order.id, |_| true, |o| {
                o.status = OrderStatus::AwaitingFunds
            })
            .unwrap();

        let shipment = ShipmentDetails {
            actual_shipping_cents: 0,
            carrier: "UPS".to_string(),
            tracking_number: "1Z001".to_string(),
        };
        let result = s.engine.settle(order.id, &shipment);
        assert!(matches!(
            result,
            Err(Error::OrderNotSettleable {
                status: OrderStatus::AwaitingFunds,
                ..
            })
        ));
    }

    #[test]
    fn test_inventory_consumed_at_settlement() {
        let s = setup();
        let merchant = Uuid::new_v4();
        let order = funded_order(&s.store, merchant, 500, 400);
        let product_id = order.lines[0].product_id;

        let shipment = ShipmentDetails {
            actual_shipping_cents: 0,
            carrier: "UPS".to_string(),
            tracking_number: "1Z002".to_string(),
        };
        s.engine.settle(order.id, &shipment).unwrap();

        let item = s.store.inventory(product_id).unwrap().unwrap();
        assert_eq!(item.on_hand, 8);
        assert_eq!(item.reserved, 0);
    }
}
