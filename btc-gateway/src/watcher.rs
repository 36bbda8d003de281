//! Deposit watcher: detect, confirm, credit, and reorg-flag deposits
//!
//! Per-deposit state machine:
//!
//! ```text
//! (none) -> Pending -> Confirmed -> Credited -> [Flagged]
//!    \________________^ (catch-up after downtime)
//! ```
//!
//! Each poll cycle fetches the tip height once, scans every Active
//! address, upserts deposits keyed by (txid, vout) - the natural key
//! that makes duplicate delivery across cycles a no-op - rotates an
//! address on its first detected transaction, re-checks confirmation
//! depth for non-terminal deposits, and credits Confirmed deposits
//! through the funding choke-point.
//!
//! A reorg that drags a credited deposit back under the threshold flips
//! it Credited→Flagged exactly once. Flagging raises an audit alert for
//! operator review; the credit is never reversed automatically.
//!
//! One address's fetch failure is caught and collected; the batch
//! continues for its siblings and the errors land in the run summary.

use crate::{
    addresses::AddressAllocator,
    chain::{AddressTransaction, ChainDataProvider},
    config::Config,
    error::Result,
};
use chrono::Utc;
use funding::{CreditSource, WalletCrediting};
use ledger_store::{
    AddressStatus, AuditKind, AuditLog, BtcDeposit, Currency, DepositKey, DepositStatus, Metrics,
    Store,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use workflow::{Event, EventSink};

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollSummary {
    /// Tip height the cycle ran against
    pub tip_height: u64,

    /// Deposit rows inserted this cycle
    pub new_deposits: u32,

    /// Pending deposits that reached the threshold
    pub confirmed: u32,

    /// Confirmed deposits credited to wallets
    pub credited: u32,

    /// Credited deposits flagged after a reorg
    pub flagged: u32,

    /// Addresses rotated on first detected transaction
    pub rotated: u32,

    /// Per-address and per-deposit failures, collected not thrown
    pub errors: Vec<String>,
}

/// The deposit watcher
pub struct DepositWatcher {
    store: Arc<Store>,
    audit: AuditLog,
    metrics: Metrics,
    chain: Arc<dyn ChainDataProvider>,
    allocator: AddressAllocator,
    crediting: WalletCrediting,
    sink: Arc<dyn EventSink>,
    confirmation_threshold: u64,
    reorg_horizon: u64,
}

impl DepositWatcher {
    /// Create the watcher
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        audit: AuditLog,
        metrics: Metrics,
        chain: Arc<dyn ChainDataProvider>,
        allocator: AddressAllocator,
        crediting: WalletCrediting,
        sink: Arc<dyn EventSink>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            audit,
            metrics,
            chain,
            allocator,
            crediting,
            sink,
            confirmation_threshold: config.confirmation_threshold,
            reorg_horizon: config.reorg_horizon,
        }
    }

    /// Confirmation depth at `tip` for a transaction mined at `height`
    ///
    /// Unconfirmed transactions have 0; so does a transaction whose
    /// recorded height sits above the tip after a reorg.
    fn confirmations(tip: u64, height: Option<u64>) -> u64 {
        match height {
            Some(h) if tip >= h => tip - h + 1,
            _ => 0,
        }
    }

    /// Run one poll cycle
    ///
    /// Fails only when the tip height itself cannot be fetched; every
    /// per-address and per-deposit failure is collected into the
    /// summary instead.
    pub async fn poll_cycle(&self) -> Result<PollSummary> {
        let tip = self.chain.tip_height().await?;
        let mut summary = PollSummary {
            tip_height: tip,
            ..PollSummary::default()
        };
        let mut fetched: HashMap<String, Vec<AddressTransaction>> = HashMap::new();

        self.detect_new_deposits(tip, &mut summary, &mut fetched)
            .await?;
        self.recheck_confirmations(tip, &mut summary, &mut fetched)
            .await?;
        self.credit_confirmed(&mut summary)?;

        self.metrics.poll_cycles_total.inc();

        let mut details = BTreeMap::new();
        details.insert("tip_height".to_string(), tip.to_string());
        details.insert("new_deposits".to_string(), summary.new_deposits.to_string());
        details.insert("confirmed".to_string(), summary.confirmed.to_string());
        details.insert("credited".to_string(), summary.credited.to_string());
        details.insert("flagged".to_string(), summary.flagged.to_string());
        details.insert("rotated".to_string(), summary.rotated.to_string());
        details.insert("errors".to_string(), summary.errors.len().to_string());
        self.audit.append_best_effort(
            AuditKind::DepositPollSummary,
            format!("Deposit poll at height {}", tip),
            details,
        );

        tracing::info!(
            tip_height = tip,
            new_deposits = summary.new_deposits,
            credited = summary.credited,
            flagged = summary.flagged,
            errors = summary.errors.len(),
            "Deposit poll cycle complete"
        );

        Ok(summary)
    }

    /// Scan Active addresses for new outputs and rotate on first sight
    async fn detect_new_deposits(
        &self,
        tip: u64,
        summary: &mut PollSummary,
        fetched: &mut HashMap<String, Vec<AddressTransaction>>,
    ) -> Result<()> {
        let active = self
            .store
            .addresses(|a| a.status == AddressStatus::Active)?;

        for addr in active {
            let txs = match self.chain.address_transactions(&addr.address).await {
                Ok(txs) => txs,
                Err(e) => {
                    tracing::warn!(address = %addr.address, "Address fetch failed: {}", e);
                    summary.errors.push(format!("{}: {}", addr.address, e));
                    continue;
                }
            };

            let mut saw_transaction = false;
            for tx in &txs {
                for (vout, output) in tx.outputs.iter().enumerate() {
                    if output.address.as_deref() != Some(addr.address.as_str()) {
                        continue;
                    }
                    saw_transaction = true;

                    let confirmations = Self::confirmations(tip, tx.confirmed_height);
                    let status = if confirmations >= self.confirmation_threshold {
                        // Catch-up after downtime: confirmed at first sight
                        DepositStatus::Confirmed
                    } else {
                        DepositStatus::Pending
                    };
                    let deposit = BtcDeposit {
                        key: DepositKey::new(tx.txid.clone(), vout as u32),
                        merchant_id: addr.merchant_id,
                        purpose: addr.purpose,
                        address: addr.address.clone(),
                        amount_sats: output.value_sats,
                        confirmations,
                        block_height: tx.confirmed_height,
                        status,
                        wallet_transaction_id: None,
                        first_seen_at: Utc::now(),
                        updated_at: Utc::now(),
                    };
                    if self.store.insert_deposit_if_absent(&deposit)? {
                        summary.new_deposits += 1;
                        self.metrics.deposits_detected_total.inc();
                        tracing::info!(
                            deposit = %deposit.key,
                            amount_sats = deposit.amount_sats,
                            confirmations,
                            "New deposit detected"
                        );
                    }
                }
            }

            if saw_transaction {
                match self.allocator.rotate(&addr.address) {
                    Ok(Some(_)) => summary.rotated += 1,
                    Ok(None) => {}
                    Err(e) => summary.errors.push(format!("rotate {}: {}", addr.address, e)),
                }
            }
            fetched.insert(addr.address.clone(), txs);
        }
        Ok(())
    }

    /// Re-read confirmation depth for every deposit that can still move
    async fn recheck_confirmations(
        &self,
        tip: u64,
        summary: &mut PollSummary,
        fetched: &mut HashMap<String, Vec<AddressTransaction>>,
    ) -> Result<()> {
        let horizon = self.confirmation_threshold + self.reorg_horizon;
        let recheck = self.store.deposits(|d| match d.status {
            DepositStatus::Pending | DepositStatus::Confirmed => true,
            DepositStatus::Credited => d.confirmations < horizon,
            DepositStatus::Flagged => false,
        })?;

        for deposit in recheck {
            if !fetched.contains_key(&deposit.address) {
                match self.chain.address_transactions(&deposit.address).await {
                    Ok(txs) => {
                        fetched.insert(deposit.address.clone(), txs);
                    }
                    Err(e) => {
                        summary.errors.push(format!("{}: {}", deposit.address, e));
                        continue;
                    }
                }
            }

            // A transaction evicted by a reorg reads as unconfirmed
            let height = fetched[&deposit.address]
                .iter()
                .find(|t| t.txid == deposit.key.txid)
                .and_then(|t| t.confirmed_height);
            let confirmations = Self::confirmations(tip, height);

            self.store.update_deposit_where(
                &deposit.key,
                |_| true,
                |d| {
                    d.confirmations = confirmations;
                    d.block_height = height;
                },
            )?;

            if confirmations >= self.confirmation_threshold {
                let cas = self.store.update_deposit_where(
                    &deposit.key,
                    |d| d.status == DepositStatus::Pending,
                    |d| d.status = DepositStatus::Confirmed,
                )?;
                if cas.applied() {
                    summary.confirmed += 1;
                }
            } else {
                let cas = self.store.update_deposit_where(
                    &deposit.key,
                    |d| d.status == DepositStatus::Credited,
                    |d| d.status = DepositStatus::Flagged,
                )?;
                if cas.applied() {
                    summary.flagged += 1;
                    self.metrics.deposits_flagged_total.inc();
                    let mut details = BTreeMap::new();
                    details.insert("deposit".to_string(), deposit.key.to_string());
                    details.insert("merchant_id".to_string(), deposit.merchant_id.to_string());
                    details.insert("confirmations".to_string(), confirmations.to_string());
                    details.insert(
                        "amount_sats".to_string(),
                        deposit.amount_sats.to_string(),
                    );
                    self.audit.append_best_effort(
                        AuditKind::ReorgFlagged,
                        format!(
                            "Credited deposit {} fell to {} confirmations",
                            deposit.key, confirmations
                        ),
                        details,
                    );
                    tracing::error!(
                        deposit = %deposit.key,
                        confirmations,
                        "Credited deposit flagged after reorg; credit left in place"
                    );
                }
            }
        }
        Ok(())
    }

    /// Credit every Confirmed deposit through the funding choke-point
    fn credit_confirmed(&self, summary: &mut PollSummary) -> Result<()> {
        let confirmed = self
            .store
            .deposits(|d| d.status == DepositStatus::Confirmed)?;

        for deposit in confirmed {
            let source = CreditSource::Deposit(deposit.key.clone());
            match self.crediting.credit(
                deposit.merchant_id,
                Currency::Btc,
                deposit.amount_sats as i64,
                &source,
            ) {
                Ok(outcome) if outcome.is_credited() => {
                    summary.credited += 1;
                    // Replay awaiting orders now that funds landed
                    self.sink.send(Event::new(
                        "top-up-credited",
                        json!({
                            "merchant_id": deposit.merchant_id,
                            "currency": Currency::Btc.code(),
                        }),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    summary.errors.push(format!("credit {}: {}", deposit.key, e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_math() {
        // Tip at the tx's own block counts as one confirmation
        assert_eq!(DepositWatcher::confirmations(100, Some(100)), 1);
        assert_eq!(DepositWatcher::confirmations(102, Some(100)), 3);
        // Unconfirmed
        assert_eq!(DepositWatcher::confirmations(100, None), 0);
        // Reorg left the recorded height above the tip
        assert_eq!(DepositWatcher::confirmations(99, Some(100)), 0);
    }
}
