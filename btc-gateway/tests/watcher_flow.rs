//! Deposit watcher flows against a scripted chain
//!
//! Drives the full detect → confirm → credit → flag lifecycle with a
//! programmable chain provider, including the idempotency and reorg
//! properties the state machine must hold across overlapping polls.

use async_trait::async_trait;
use btc_gateway::{
    AddressAllocator, AddressTransaction, ChainDataProvider, Config, DepositWatcher, TxOutputInfo,
};
use funding::WalletCrediting;
use ledger_store::{
    AddressPurpose, AddressStatus, AuditKind, AuditLog, Currency, DepositStatus, Metrics, Store,
    TransactionKind,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use workflow::MemorySink;

const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

#[derive(Default)]
struct MockChain {
    tip: Mutex<u64>,
    txs: Mutex<HashMap<String, Vec<AddressTransaction>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockChain {
    fn set_tip(&self, height: u64) {
        *self.tip.lock() = height;
    }

    fn add_tx(&self, address: &str, txid: &str, value_sats: u64, height: Option<u64>) {
        self.txs
            .lock()
            .entry(address.to_string())
            .or_default()
            .push(AddressTransaction {
                txid: txid.to_string(),
                outputs: vec![TxOutputInfo {
                    address: Some(address.to_string()),
                    value_sats,
                }],
                confirmed_height: height,
            });
    }

    fn set_height(&self, address: &str, txid: &str, height: Option<u64>) {
        if let Some(txs) = self.txs.lock().get_mut(address) {
            for tx in txs.iter_mut().filter(|t| t.txid == txid) {
                tx.confirmed_height = height;
            }
        }
    }

    fn fail_address(&self, address: &str) {
        self.failing.lock().insert(address.to_string());
    }
}

#[async_trait]
impl ChainDataProvider for MockChain {
    async fn tip_height(&self) -> btc_gateway::Result<u64> {
        Ok(*self.tip.lock())
    }

    async fn address_transactions(
        &self,
        address: &str,
    ) -> btc_gateway::Result<Vec<AddressTransaction>> {
        if self.failing.lock().contains(address) {
            return Err(btc_gateway::Error::Provider("scripted outage".to_string()));
        }
        Ok(self.txs.lock().get(address).cloned().unwrap_or_default())
    }
}

struct Harness {
    store: Arc<Store>,
    chain: Arc<MockChain>,
    watcher: DepositWatcher,
    allocator: AddressAllocator,
    audit: AuditLog,
    sink: Arc<MemorySink>,
    _temp: TempDir,
}

fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let mut store_config = ledger_store::Config::default();
    store_config.data_dir = temp.path().to_path_buf();
    let store = Arc::new(Store::open(&store_config).unwrap());

    let chain = Arc::new(MockChain::default());
    let metrics = Metrics::new().unwrap();
    let audit = AuditLog::new(store.clone());
    let sink = Arc::new(MemorySink::new());
    let allocator =
        AddressAllocator::new(store.clone(), XPUB, XPUB, bitcoin_network());
    let crediting = WalletCrediting::new(store.clone(), metrics.clone());

    let config = Config {
        confirmation_threshold: 3,
        reorg_horizon: 12,
        ..Config::default()
    };

    let watcher = DepositWatcher::new(
        store.clone(),
        audit.clone(),
        metrics,
        chain.clone(),
        allocator.clone(),
        crediting,
        sink.clone(),
        &config,
    );

    Harness {
        store,
        chain,
        watcher,
        allocator,
        audit,
        sink,
        _temp: temp,
    }
}

fn bitcoin_network() -> bitcoin::Network {
    bitcoin::Network::Bitcoin
}

#[tokio::test]
async fn duplicate_polls_ingest_one_row() {
    let h = harness();
    let merchant = Uuid::new_v4();
    let addr = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();

    h.chain.set_tip(100);
    h.chain.add_tx(&addr.address, "aa01", 5_000, Some(100));

    let first = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(first.new_deposits, 1);

    // Same chain data on the next cycle: the (txid, vout) key dedupes
    let second = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(second.new_deposits, 0);

    let deposits = h.store.deposits(|_| true).unwrap();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].status, DepositStatus::Pending);
    assert_eq!(deposits[0].confirmations, 1);
}

#[tokio::test]
async fn address_rotates_on_first_transaction() {
    let h = harness();
    let merchant = Uuid::new_v4();
    let addr = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();

    h.chain.set_tip(50);
    h.chain.add_tx(&addr.address, "bb01", 1_000, None);

    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.rotated, 1);

    let retired = h.store.address(&addr.address).unwrap().unwrap();
    assert_eq!(retired.status, AddressStatus::Used);

    // A fresh Active address exists for the same merchant and purpose
    let active = h
        .store
        .addresses(|a| a.status == AddressStatus::Active)
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].merchant_id, merchant);
    assert_eq!(active[0].purpose, AddressPurpose::Topup);
    assert_eq!(active[0].derivation_index, addr.derivation_index + 1);
}

#[tokio::test]
async fn deposit_confirms_and_credits() {
    let h = harness();
    let merchant = Uuid::new_v4();
    h.store.create_wallet(merchant, Currency::Btc).unwrap();
    let addr = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();

    // One confirmation at first sight
    h.chain.set_tip(100);
    h.chain.add_tx(&addr.address, "cc01", 25_000, Some(100));
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.new_deposits, 1);
    assert_eq!(summary.credited, 0);

    // Two more blocks reach the threshold; the same cycle credits
    h.chain.set_tip(102);
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.confirmed, 1);
    assert_eq!(summary.credited, 1);

    let wallet = h.store.wallet(merchant, Currency::Btc).unwrap().unwrap();
    assert_eq!(wallet.balance_cents, 25_000);

    let deposits = h.store.deposits(|_| true).unwrap();
    assert_eq!(deposits[0].status, DepositStatus::Credited);
    assert!(deposits[0].wallet_transaction_id.is_some());

    let entries = h.store.transactions(|_| true).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, TransactionKind::BtcDepositTopup);

    // A top-up event was queued for the funding workflows
    let events = h.sink.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "top-up-credited");

    // Re-polling does not double-credit
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.credited, 0);
    let wallet = h.store.wallet(merchant, Currency::Btc).unwrap().unwrap();
    assert_eq!(wallet.balance_cents, 25_000);
}

#[tokio::test]
async fn catch_up_credits_at_first_sight() {
    let h = harness();
    let merchant = Uuid::new_v4();
    h.store.create_wallet(merchant, Currency::Btc).unwrap();
    let addr = h.allocator.allocate(merchant, AddressPurpose::Tip).unwrap();

    // Already deep in the chain when first seen (downtime catch-up)
    h.chain.set_tip(210);
    h.chain.add_tx(&addr.address, "dd01", 4_000, Some(200));

    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.new_deposits, 1);
    assert_eq!(summary.credited, 1);

    let entries = h.store.transactions(|_| true).unwrap();
    assert_eq!(entries[0].kind, TransactionKind::BtcDepositTip);
}

#[tokio::test]
async fn reorg_flags_exactly_once_without_reversal() {
    let h = harness();
    let merchant = Uuid::new_v4();
    h.store.create_wallet(merchant, Currency::Btc).unwrap();
    let addr = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();

    h.chain.set_tip(105);
    h.chain.add_tx(&addr.address, "ee01", 9_000, Some(100));
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.credited, 1);

    // The reorg evicts the transaction from its block
    h.chain.set_height(&addr.address, "ee01", None);
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.flagged, 1);

    let deposits = h.store.deposits(|_| true).unwrap();
    assert_eq!(deposits[0].status, DepositStatus::Flagged);
    assert_eq!(deposits[0].confirmations, 0);

    // The credit stays in place
    let wallet = h.store.wallet(merchant, Currency::Btc).unwrap().unwrap();
    assert_eq!(wallet.balance_cents, 9_000);

    // Exactly one audit event, even across further polls
    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.flagged, 0);
    let flags = h.audit.entries_of_kind(AuditKind::ReorgFlagged).unwrap();
    assert_eq!(flags.len(), 1);
}

#[tokio::test]
async fn one_address_failure_does_not_abort_batch() {
    let h = harness();
    let merchant = Uuid::new_v4();
    h.store.create_wallet(merchant, Currency::Btc).unwrap();

    let healthy = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();
    let broken = h.allocator.allocate(merchant, AddressPurpose::Topup).unwrap();

    h.chain.set_tip(120);
    h.chain.add_tx(&healthy.address, "ff01", 2_000, Some(120));
    h.chain.fail_address(&broken.address);

    let summary = h.watcher.poll_cycle().await.unwrap();
    assert_eq!(summary.new_deposits, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains(&broken.address));

    // The run summary still landed in the audit trail
    let polls = h
        .audit
        .entries_of_kind(AuditKind::DepositPollSummary)
        .unwrap();
    assert_eq!(polls.len(), 1);
}
