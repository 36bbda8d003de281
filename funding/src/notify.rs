//! Best-effort merchant notifications
//!
//! Merchants hear about funding outcomes (shortfalls, auto-funding,
//! payment receipt) through a collaborator behind [`Notifier`]. Delivery
//! is fire-and-forget: a failed send is logged and never blocks or fails
//! the ledger commit it follows.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a merchant is told
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerchantNotice {
    /// An order could not be funded; carries the amount still missing
    AwaitingFunds {
        /// The unfunded order
        order_id: Uuid,
        /// Amount the available balance fell short by
        shortfall_cents: i64,
    },

    /// An order was funded from the wallet
    OrderFunded {
        /// The funded order
        order_id: Uuid,
    },

    /// A top-up invoice payment arrived and was credited
    PaymentReceived {
        /// The paid invoice
        invoice_id: Uuid,
        /// Credited amount in minor units
        amount_cents: i64,
    },
}

/// Notification delivery failure
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Notification collaborator (in-app notification + email)
pub trait Notifier: Send + Sync {
    /// Deliver a notice
    fn notify(&self, merchant_id: Uuid, notice: &MerchantNotice)
        -> std::result::Result<(), NotifyError>;

    /// Deliver a notice, logging rather than propagating failure
    fn notify_best_effort(&self, merchant_id: Uuid, notice: &MerchantNotice) {
        if let Err(e) = self.notify(merchant_id, notice) {
            tracing::warn!(%merchant_id, ?notice, "Notification dropped: {}", e);
        }
    }
}

/// Notifier that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(
        &self,
        _merchant_id: Uuid,
        _notice: &MerchantNotice,
    ) -> std::result::Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier that records every notice, for tests
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, MerchantNotice)>>,
    failing: bool,
}

impl RecordingNotifier {
    /// Create a recording notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose every send fails
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// All notices delivered so far
    pub fn sent(&self) -> Vec<(Uuid, MerchantNotice)> {
        self.sent.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        merchant_id: Uuid,
        notice: &MerchantNotice,
    ) -> std::result::Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError("configured to fail".to_string()));
        }
        self.sent.lock().push((merchant_id, notice.clone()));
        Ok(())
    }
}
