//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallet_accounts` - One row per (merchant, currency)
//! - `wallet_transactions` - Append-only ledger entries (key: entry id)
//! - `mercury_invoices` - Fiat top-up invoices (key: invoice id)
//! - `btc_addresses` - Derived receiving addresses (key: address)
//! - `btc_address_counters` - Derivation counters (key: purpose)
//! - `btc_deposits` - On-chain deposits (key: txid:vout)
//! - `orders` - Merchant orders (key: order id)
//! - `inventory_items` - Product stock (key: product id)
//! - `audit_log` - Hash-chained audit entries (key: entry id, UUIDv7)
//!
//! # Conditional updates
//!
//! Every mutation that must not double-apply goes through an
//! `update_*_where` method: the caller supplies a predicate over the
//! current row and a mutation applied only when the predicate holds.
//! Per-table write locks make the read-check-write atomic, so a
//! [`CasOutcome::Stale`] result means another writer got there first -
//! a benign no-op unless the caller chooses to retry.

use crate::{
    config::Config,
    error::{Error, Result},
    types::{
        AddressCounter, AddressPurpose, BtcAddress, BtcDeposit, Currency, DepositKey,
        InventoryItem, MercuryInvoice, Order, WalletAccount, WalletTransaction,
    },
};
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallet_accounts";
const CF_TRANSACTIONS: &str = "wallet_transactions";
const CF_INVOICES: &str = "mercury_invoices";
const CF_ADDRESSES: &str = "btc_addresses";
const CF_COUNTERS: &str = "btc_address_counters";
const CF_DEPOSITS: &str = "btc_deposits";
const CF_ORDERS: &str = "orders";
const CF_INVENTORY: &str = "inventory_items";
const CF_AUDIT: &str = "audit_log";

const ALL_CFS: [&str; 9] = [
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_INVOICES,
    CF_ADDRESSES,
    CF_COUNTERS,
    CF_DEPOSITS,
    CF_ORDERS,
    CF_INVENTORY,
    CF_AUDIT,
];

/// Outcome of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Predicate held; mutation written
    Applied,
    /// Predicate failed; row untouched (another writer got there first)
    Stale,
    /// No row under the key
    Missing,
}

impl CasOutcome {
    /// Whether the mutation was written
    pub fn applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}

/// Store wrapper for RocksDB
pub struct Store {
    db: DB,
    write_locks: HashMap<&'static str, Mutex<()>>,
}

impl Store {
    /// Open or create the store
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let write_locks = ALL_CFS.iter().map(|name| (*name, Mutex::new(()))).collect();

        tracing::info!("Opened ledger store at {:?}", path);

        Ok(Self { db, write_locks })
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_lock(&self, cf: &'static str) -> MutexGuard<'_, ()> {
        self.write_locks
            .get(cf)
            .expect("all column families have a write lock")
            .lock()
    }

    // Generic row operations

    fn get_row<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf_handle(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_row<T: Serialize>(&self, cf: &'static str, key: &[u8], row: &T) -> Result<()> {
        let handle = self.cf_handle(cf)?;
        self.db.put_cf(handle, key, bincode::serialize(row)?)?;
        Ok(())
    }

    fn insert_if_absent_row<T: Serialize>(
        &self,
        cf: &'static str,
        key: &[u8],
        row: &T,
    ) -> Result<bool> {
        let _guard = self.write_lock(cf);
        let handle = self.cf_handle(cf)?;
        if self.db.get_cf(handle, key)?.is_some() {
            return Ok(false);
        }
        self.db.put_cf(handle, key, bincode::serialize(row)?)?;
        Ok(true)
    }

    fn update_where_row<T, P, M>(
        &self,
        cf: &'static str,
        key: &[u8],
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        T: Serialize + DeserializeOwned,
        P: FnOnce(&T) -> bool,
        M: FnOnce(&mut T),
    {
        let _guard = self.write_lock(cf);
        let handle = self.cf_handle(cf)?;
        let bytes = match self.db.get_cf(handle, key)? {
            Some(bytes) => bytes,
            None => return Ok(CasOutcome::Missing),
        };
        let mut row: T = bincode::deserialize(&bytes)?;
        if !predicate(&row) {
            return Ok(CasOutcome::Stale);
        }
        mutate(&mut row);
        self.db.put_cf(handle, key, bincode::serialize(&row)?)?;
        Ok(CasOutcome::Applied)
    }

    fn scan<T, F>(&self, cf: &'static str, filter: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let handle = self.cf_handle(cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_, value) = item?;
            let row: T = bincode::deserialize(&value)?;
            if filter(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    // Wallet operations

    fn wallet_key(merchant_id: Uuid, currency: Currency) -> Vec<u8> {
        let mut key = merchant_id.as_bytes().to_vec();
        key.extend_from_slice(currency.code().as_bytes());
        key
    }

    /// Create the wallet for (merchant, currency) if it does not exist
    ///
    /// Returns the current row either way; wallets are never deleted.
    pub fn create_wallet(&self, merchant_id: Uuid, currency: Currency) -> Result<WalletAccount> {
        let key = Self::wallet_key(merchant_id, currency);
        let now = Utc::now();
        let wallet = WalletAccount {
            id: Uuid::new_v4(),
            merchant_id,
            currency,
            balance_cents: 0,
            reserved_cents: 0,
            created_at: now,
            updated_at: now,
        };
        self.insert_if_absent_row(CF_WALLETS, &key, &wallet)?;
        self.get_row(CF_WALLETS, &key)?
            .ok_or_else(|| Error::WalletNotFound(format!("{}/{}", merchant_id, currency)))
    }

    /// Get the wallet for (merchant, currency)
    pub fn wallet(&self, merchant_id: Uuid, currency: Currency) -> Result<Option<WalletAccount>> {
        self.get_row(CF_WALLETS, &Self::wallet_key(merchant_id, currency))
    }

    /// Conditionally update the wallet for (merchant, currency)
    ///
    /// The mutation is applied only while the predicate holds under the
    /// table's write lock; `updated_at` is bumped on success.
    pub fn update_wallet_where<P, M>(
        &self,
        merchant_id: Uuid,
        currency: Currency,
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        P: FnOnce(&WalletAccount) -> bool,
        M: FnOnce(&mut WalletAccount),
    {
        let key = Self::wallet_key(merchant_id, currency);
        self.update_where_row(CF_WALLETS, &key, predicate, |row: &mut WalletAccount| {
            mutate(row);
            row.updated_at = Utc::now();
        })
    }

    /// All wallets matching a filter
    pub fn wallets<F: Fn(&WalletAccount) -> bool>(&self, filter: F) -> Result<Vec<WalletAccount>> {
        self.scan(CF_WALLETS, filter)
    }

    // Ledger entry operations

    /// Append a ledger entry
    ///
    /// Entries are immutable; the id must be fresh.
    pub fn append_transaction(&self, entry: &WalletTransaction) -> Result<()> {
        self.put_row(CF_TRANSACTIONS, entry.id.as_bytes(), entry)?;
        tracing::debug!(
            entry_id = %entry.id,
            kind = entry.kind.as_str(),
            amount_cents = entry.amount_cents,
            "Ledger entry appended"
        );
        Ok(())
    }

    /// Get a ledger entry by id
    pub fn transaction(&self, id: Uuid) -> Result<Option<WalletTransaction>> {
        self.get_row(CF_TRANSACTIONS, id.as_bytes())
    }

    /// All ledger entries matching a filter
    pub fn transactions<F: Fn(&WalletTransaction) -> bool>(
        &self,
        filter: F,
    ) -> Result<Vec<WalletTransaction>> {
        self.scan(CF_TRANSACTIONS, filter)
    }

    // Invoice operations

    /// Insert a new invoice
    pub fn insert_invoice(&self, invoice: &MercuryInvoice) -> Result<()> {
        self.put_row(CF_INVOICES, invoice.id.as_bytes(), invoice)
    }

    /// Get an invoice by id
    pub fn invoice(&self, id: Uuid) -> Result<Option<MercuryInvoice>> {
        self.get_row(CF_INVOICES, id.as_bytes())
    }

    /// Conditionally update an invoice
    pub fn update_invoice_where<P, M>(&self, id: Uuid, predicate: P, mutate: M) -> Result<CasOutcome>
    where
        P: FnOnce(&MercuryInvoice) -> bool,
        M: FnOnce(&mut MercuryInvoice),
    {
        self.update_where_row(CF_INVOICES, id.as_bytes(), predicate, |row: &mut MercuryInvoice| {
            mutate(row);
            row.updated_at = Utc::now();
        })
    }

    /// All invoices matching a filter
    pub fn invoices<F: Fn(&MercuryInvoice) -> bool>(&self, filter: F) -> Result<Vec<MercuryInvoice>> {
        self.scan(CF_INVOICES, filter)
    }

    // Address operations

    /// Insert a derived address if its key is unused
    pub fn insert_address_if_absent(&self, address: &BtcAddress) -> Result<bool> {
        self.insert_if_absent_row(CF_ADDRESSES, address.address.as_bytes(), address)
    }

    /// Get an address row
    pub fn address(&self, address: &str) -> Result<Option<BtcAddress>> {
        self.get_row(CF_ADDRESSES, address.as_bytes())
    }

    /// Conditionally update an address row
    pub fn update_address_where<P, M>(
        &self,
        address: &str,
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        P: FnOnce(&BtcAddress) -> bool,
        M: FnOnce(&mut BtcAddress),
    {
        self.update_where_row(CF_ADDRESSES, address.as_bytes(), predicate, mutate)
    }

    /// All address rows matching a filter
    pub fn addresses<F: Fn(&BtcAddress) -> bool>(&self, filter: F) -> Result<Vec<BtcAddress>> {
        self.scan(CF_ADDRESSES, filter)
    }

    // Derivation counter operations

    /// Get the counter for a purpose, initializing it at zero if absent
    pub fn counter(&self, purpose: AddressPurpose) -> Result<AddressCounter> {
        let key = purpose.as_str().as_bytes();
        let counter = AddressCounter {
            purpose,
            next_index: 0,
        };
        self.insert_if_absent_row(CF_COUNTERS, key, &counter)?;
        self.get_row(CF_COUNTERS, key)?
            .ok_or_else(|| Error::Other(format!("counter missing for {}", purpose.as_str())))
    }

    /// Conditionally update the counter for a purpose
    pub fn update_counter_where<P, M>(
        &self,
        purpose: AddressPurpose,
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        P: FnOnce(&AddressCounter) -> bool,
        M: FnOnce(&mut AddressCounter),
    {
        self.update_where_row(CF_COUNTERS, purpose.as_str().as_bytes(), predicate, mutate)
    }

    // Deposit operations

    /// Insert a deposit row keyed by (txid, vout) if absent
    ///
    /// The natural key makes duplicate delivery across poll cycles a
    /// no-op; returns whether the row was new.
    pub fn insert_deposit_if_absent(&self, deposit: &BtcDeposit) -> Result<bool> {
        self.insert_if_absent_row(CF_DEPOSITS, &deposit.key.storage_key(), deposit)
    }

    /// Get a deposit by key
    pub fn deposit(&self, key: &DepositKey) -> Result<Option<BtcDeposit>> {
        self.get_row(CF_DEPOSITS, &key.storage_key())
    }

    /// Conditionally update a deposit
    pub fn update_deposit_where<P, M>(
        &self,
        key: &DepositKey,
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        P: FnOnce(&BtcDeposit) -> bool,
        M: FnOnce(&mut BtcDeposit),
    {
        self.update_where_row(CF_DEPOSITS, &key.storage_key(), predicate, |row: &mut BtcDeposit| {
            mutate(row);
            row.updated_at = Utc::now();
        })
    }

    /// All deposits matching a filter
    pub fn deposits<F: Fn(&BtcDeposit) -> bool>(&self, filter: F) -> Result<Vec<BtcDeposit>> {
        self.scan(CF_DEPOSITS, filter)
    }

    // Order operations

    /// Insert a new order
    pub fn insert_order(&self, order: &Order) -> Result<()> {
        self.put_row(CF_ORDERS, order.id.as_bytes(), order)
    }

    /// Get an order by id
    pub fn order(&self, id: Uuid) -> Result<Option<Order>> {
        self.get_row(CF_ORDERS, id.as_bytes())
    }

    /// Conditionally update an order
    pub fn update_order_where<P, M>(&self, id: Uuid, predicate: P, mutate: M) -> Result<CasOutcome>
    where
        P: FnOnce(&Order) -> bool,
        M: FnOnce(&mut Order),
    {
        self.update_where_row(CF_ORDERS, id.as_bytes(), predicate, |row: &mut Order| {
            mutate(row);
            row.updated_at = Utc::now();
        })
    }

    /// All orders matching a filter
    pub fn orders<F: Fn(&Order) -> bool>(&self, filter: F) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS, filter)
    }

    /// Orders awaiting funds for one merchant wallet, oldest first
    ///
    /// The ordering is the FIFO contract of the batch funding pass:
    /// creation time, then id as a deterministic tiebreak.
    pub fn awaiting_funds_orders(
        &self,
        merchant_id: Uuid,
        currency: Currency,
    ) -> Result<Vec<Order>> {
        let mut orders = self.scan::<Order, _>(CF_ORDERS, |o| {
            o.merchant_id == merchant_id
                && o.currency == currency
                && o.status == crate::types::OrderStatus::AwaitingFunds
        })?;
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    // Inventory operations

    /// Insert or replace an inventory row
    pub fn put_inventory(&self, item: &InventoryItem) -> Result<()> {
        self.put_row(CF_INVENTORY, item.product_id.as_bytes(), item)
    }

    /// Get inventory for a product
    pub fn inventory(&self, product_id: Uuid) -> Result<Option<InventoryItem>> {
        self.get_row(CF_INVENTORY, product_id.as_bytes())
    }

    /// Conditionally update inventory for a product
    pub fn update_inventory_where<P, M>(
        &self,
        product_id: Uuid,
        predicate: P,
        mutate: M,
    ) -> Result<CasOutcome>
    where
        P: FnOnce(&InventoryItem) -> bool,
        M: FnOnce(&mut InventoryItem),
    {
        self.update_where_row(CF_INVENTORY, product_id.as_bytes(), predicate, mutate)
    }

    // Audit operations (chained appends live in `audit`)

    pub(crate) fn with_audit_lock<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let _guard = self.write_lock(CF_AUDIT);
        f()
    }

    pub(crate) fn last_audit_entry(&self) -> Result<Option<crate::audit::AuditEntry>> {
        let handle = self.cf_handle(CF_AUDIT)?;
        for item in self.db.iterator_cf(handle, IteratorMode::End) {
            let (_, value) = item?;
            return Ok(Some(bincode::deserialize(&value)?));
        }
        Ok(None)
    }

    pub(crate) fn put_audit_entry(&self, entry: &crate::audit::AuditEntry) -> Result<()> {
        self.put_row(CF_AUDIT, entry.id.as_bytes(), entry)
    }

    /// All audit entries in append order
    pub fn audit_entries(&self) -> Result<Vec<crate::audit::AuditEntry>> {
        self.scan(CF_AUDIT, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositStatus, OrderLine, OrderStatus};
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Store::open(&config).unwrap(), temp_dir)
    }

    fn test_deposit(txid: &str, vout: u32) -> BtcDeposit {
        BtcDeposit {
            key: DepositKey::new(txid, vout),
            merchant_id: Uuid::new_v4(),
            purpose: AddressPurpose::Topup,
            address: "bc1qtest".to_string(),
            amount_sats: 5000,
            confirmations: 0,
            block_height: None,
            status: DepositStatus::Pending,
            wallet_transaction_id: None,
            first_seen_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_store_open() {
        let (_store, _temp) = test_store();
    }

    #[test]
    fn test_create_wallet_idempotent() {
        let (store, _temp) = test_store();
        let merchant = Uuid::new_v4();

        let first = store.create_wallet(merchant, Currency::Usd).unwrap();
        let second = store.create_wallet(merchant, Currency::Usd).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.balance_cents, 0);
    }

    #[test]
    fn test_wallet_conditional_update() {
        let (store, _temp) = test_store();
        let merchant = Uuid::new_v4();
        store.create_wallet(merchant, Currency::Usd).unwrap();

        // Applied when the expected balance matches
        let outcome = store
            .update_wallet_where(merchant, Currency::Usd, |w| w.balance_cents == 0, |w| {
                w.balance_cents += 100
            })
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        // Stale when it does not
        let outcome = store
            .update_wallet_where(merchant, Currency::Usd, |w| w.balance_cents == 0, |w| {
                w.balance_cents += 100
            })
            .unwrap();
        assert_eq!(outcome, CasOutcome::Stale);

        // Missing for an unknown wallet
        let outcome = store
            .update_wallet_where(Uuid::new_v4(), Currency::Usd, |_| true, |_| {})
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);

        let wallet = store.wallet(merchant, Currency::Usd).unwrap().unwrap();
        assert_eq!(wallet.balance_cents, 100);
    }

    #[test]
    fn test_deposit_insert_if_absent() {
        let (store, _temp) = test_store();

        let deposit = test_deposit("aa01", 0);
        assert!(store.insert_deposit_if_absent(&deposit).unwrap());
        // Same (txid, vout) again is a no-op
        assert!(!store.insert_deposit_if_absent(&deposit).unwrap());
        // Different vout of the same tx is a new row
        assert!(store.insert_deposit_if_absent(&test_deposit("aa01", 1)).unwrap());

        let all = store.deposits(|_| true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_awaiting_orders_fifo() {
        let (store, _temp) = test_store();
        let merchant = Uuid::new_v4();
        let base = Utc::now();

        // Insert newest-first to prove the sort
        for (i, offset) in [2i64, 0, 1].iter().enumerate() {
            let order = Order {
                id: Uuid::new_v4(),
                merchant_id: merchant,
                currency: Currency::Usd,
                lines: vec![OrderLine {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price_cents: 100 * (i as i64 + 1),
                }],
                total_estimate_cents: 100 * (i as i64 + 1),
                actual_total_cents: None,
                status: OrderStatus::AwaitingFunds,
                wallet_id: None,
                funded_at: None,
                created_at: base + Duration::seconds(*offset),
                updated_at: base,
            };
            store.insert_order(&order).unwrap();
        }

        let orders = store.awaiting_funds_orders(merchant, Currency::Usd).unwrap();
        assert_eq!(orders.len(), 3);
        assert!(orders.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn test_counter_init_and_update() {
        let (store, _temp) = test_store();

        let counter = store.counter(AddressPurpose::Topup).unwrap();
        assert_eq!(counter.next_index, 0);

        let outcome = store
            .update_counter_where(AddressPurpose::Topup, |c| c.next_index == 0, |c| {
                c.next_index += 1
            })
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        assert_eq!(store.counter(AddressPurpose::Topup).unwrap().next_index, 1);
        // Tip counter is independent
        assert_eq!(store.counter(AddressPurpose::Tip).unwrap().next_index, 0);
    }

    #[test]
    fn test_inventory_reserve_conditional() {
        let (store, _temp) = test_store();
        let product = Uuid::new_v4();
        store
            .put_inventory(&InventoryItem {
                product_id: product,
                on_hand: 5,
                reserved: 0,
            })
            .unwrap();

        let outcome = store
            .update_inventory_where(product, |i| i.sellable() >= 3, |i| i.reserved += 3)
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        // Only 2 sellable left
        let outcome = store
            .update_inventory_where(product, |i| i.sellable() >= 3, |i| i.reserved += 3)
            .unwrap();
        assert_eq!(outcome, CasOutcome::Stale);
    }
}
