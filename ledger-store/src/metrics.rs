//! Metrics collection for observability
//!
//! Prometheus counters for the funding subsystem.
//!
//! # Metrics
//!
//! - `wallet_credits_total` - Wallet credits applied
//! - `wallet_credit_noops_total` - Credit attempts that lost the claim
//! - `reservations_total` - Order reservations taken
//! - `reservation_conflicts_total` - Reservation attempts that lost the balance race
//! - `settlements_total` - Orders settled at shipment
//! - `deposits_detected_total` - New deposit rows inserted
//! - `deposits_flagged_total` - Credited deposits flagged after a reorg
//! - `poll_cycles_total` - Deposit poll cycles completed
//! - `invoices_synced_total` - Invoice status transitions applied

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Wallet credits applied
    pub wallet_credits_total: IntCounter,

    /// Credit attempts that lost the claim
    pub wallet_credit_noops_total: IntCounter,

    /// Order reservations taken
    pub reservations_total: IntCounter,

    /// Reservation attempts that lost the balance race
    pub reservation_conflicts_total: IntCounter,

    /// Orders settled at shipment
    pub settlements_total: IntCounter,

    /// New deposit rows inserted
    pub deposits_detected_total: IntCounter,

    /// Credited deposits flagged after a reorg
    pub deposits_flagged_total: IntCounter,

    /// Deposit poll cycles completed
    pub poll_cycles_total: IntCounter,

    /// Invoice status transitions applied
    pub invoices_synced_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        Ok(Self {
            wallet_credits_total: counter("wallet_credits_total", "Wallet credits applied")?,
            wallet_credit_noops_total: counter(
                "wallet_credit_noops_total",
                "Credit attempts that lost the claim",
            )?,
            reservations_total: counter("reservations_total", "Order reservations taken")?,
            reservation_conflicts_total: counter(
                "reservation_conflicts_total",
                "Reservation attempts that lost the balance race",
            )?,
            settlements_total: counter("settlements_total", "Orders settled at shipment")?,
            deposits_detected_total: counter(
                "deposits_detected_total",
                "New deposit rows inserted",
            )?,
            deposits_flagged_total: counter(
                "deposits_flagged_total",
                "Credited deposits flagged after a reorg",
            )?,
            poll_cycles_total: counter("poll_cycles_total", "Deposit poll cycles completed")?,
            invoices_synced_total: counter(
                "invoices_synced_total",
                "Invoice status transitions applied",
            )?,
            registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();

        metrics.wallet_credits_total.inc();
        metrics.wallet_credits_total.inc();
        assert_eq!(metrics.wallet_credits_total.get(), 2);

        let families = metrics.registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "wallet_credits_total"));
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not clash over registration
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.poll_cycles_total.inc();
        assert_eq!(b.poll_cycles_total.get(), 0);
    }
}
