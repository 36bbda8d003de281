//! Core types for the merchant wallet ledger
//!
//! All amounts are signed integers in the currency's minor unit (cents
//! for fiat, satoshis for BTC). Exact decimal arithmetic only happens at
//! the invoicing-provider boundary, before amounts enter these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Wallet currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar (minor unit: cent)
    Usd,
    /// Euro (minor unit: cent)
    Eur,
    /// British Pound (minor unit: penny)
    Gbp,
    /// Bitcoin (minor unit: satoshi)
    Btc,
}

impl Currency {
    /// Currency code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Btc => "BTC",
        }
    }

    /// Parse from code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            "BTC" => Some(Currency::Btc),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Merchant wallet account, one per (merchant, currency)
///
/// Mutated only through conditional updates keyed on the previously read
/// balance/reserved values. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    /// Wallet ID
    pub id: Uuid,

    /// Owning merchant
    pub merchant_id: Uuid,

    /// Wallet currency
    pub currency: Currency,

    /// Settled funds in minor units
    pub balance_cents: i64,

    /// Funds earmarked for in-flight orders
    pub reserved_cents: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    /// Funds available for new order reservations
    ///
    /// The compliance reserve is a fixed per-currency buffer held back
    /// from order funding.
    pub fn available_cents(&self, compliance_reserve_cents: i64) -> i64 {
        self.balance_cents - self.reserved_cents - compliance_reserve_cents
    }
}

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Fiat top-up invoice credited
    Topup,
    /// Funds earmarked for an order
    Reservation,
    /// Final balance decrease at shipment
    Settlement,
    /// BTC deposit to a top-up address credited
    BtcDepositTopup,
    /// BTC deposit to a tip address credited
    BtcDepositTip,
}

impl TransactionKind {
    /// Stable string form, used in audit rows and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Topup => "TOPUP",
            TransactionKind::Reservation => "RESERVATION",
            TransactionKind::Settlement => "SETTLEMENT",
            TransactionKind::BtcDepositTopup => "BTC_DEPOSIT_TOPUP",
            TransactionKind::BtcDepositTip => "BTC_DEPOSIT_TIP",
        }
    }
}

/// What external record a ledger entry traces back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionReference {
    /// An order (reservation, settlement)
    Order(Uuid),
    /// A fiat top-up invoice
    Invoice(Uuid),
    /// A BTC deposit
    Deposit(DepositKey),
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionReference::Order(id) => write!(f, "order:{}", id),
            TransactionReference::Invoice(id) => write!(f, "invoice:{}", id),
            TransactionReference::Deposit(key) => write!(f, "deposit:{}", key),
        }
    }
}

/// Append-only wallet ledger entry
///
/// Immutable once written. The wallet balance is, in principle, a
/// derived cache of these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Wallet this entry applies to
    pub wallet_id: Uuid,

    /// Owning merchant
    pub merchant_id: Uuid,

    /// Currency
    pub currency: Currency,

    /// Entry type
    pub kind: TransactionKind,

    /// Signed amount in minor units
    pub amount_cents: i64,

    /// Balance snapshot after this entry applied
    pub balance_after_cents: i64,

    /// External record this entry traces back to
    pub reference: TransactionReference,

    /// Free-text description
    pub description: String,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Fiat top-up invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Issued, not yet paid
    Unpaid,
    /// Payment initiated but not settled; must never credit the wallet
    Processing,
    /// Settled (terminal)
    Paid,
    /// Cancelled (terminal)
    Cancelled,
}

impl InvoiceStatus {
    /// Whether the invoice can still transition
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Unpaid | InvoiceStatus::Processing)
    }
}

/// Fiat top-up invoice issued through the invoicing provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MercuryInvoice {
    /// Invoice ID
    pub id: Uuid,

    /// Merchant the top-up is for
    pub merchant_id: Uuid,

    /// Wallet currency to credit
    pub currency: Currency,

    /// Invoice amount in minor units
    pub amount_cents: i64,

    /// Provider-side invoice ID
    pub external_id: String,

    /// Provider-side invoice number
    pub number: String,

    /// Hosted payment URL
    pub pay_url: String,

    /// Current status
    pub status: InvoiceStatus,

    /// Idempotency guard: flipped exactly once, before the credit
    pub wallet_credited: bool,

    /// Ledger entry written by the credit, once linked
    pub wallet_transaction_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Receiving address purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressPurpose {
    /// Wallet top-up deposits
    Topup,
    /// Tip deposits
    Tip,
}

impl AddressPurpose {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressPurpose::Topup => "TOPUP",
            AddressPurpose::Tip => "TIP",
        }
    }
}

/// Receiving address status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStatus {
    /// Currently handed out; polled for deposits
    Active,
    /// Rotated away after its first detected transaction
    Used,
}

/// A derived receiving address
///
/// The derivation index is monotonic per purpose across all merchants,
/// claimed from the shared counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcAddress {
    /// The address string (also the row key)
    pub address: String,

    /// Merchant deposits to this address credit
    pub merchant_id: Uuid,

    /// Address purpose
    pub purpose: AddressPurpose,

    /// Index the address was derived at
    pub derivation_index: u32,

    /// Current status
    pub status: AddressStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Monotonic derivation counter, one per purpose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressCounter {
    /// Purpose this counter serves
    pub purpose: AddressPurpose,

    /// Next unclaimed derivation index
    pub next_index: u32,
}

/// Natural idempotency key of a deposit: one row per transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositKey {
    /// Transaction ID
    pub txid: String,

    /// Output index within the transaction
    pub vout: u32,
}

impl DepositKey {
    /// Create a new key
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }

    /// Row key bytes
    pub fn storage_key(&self) -> Vec<u8> {
        format!("{}:{}", self.txid, self.vout).into_bytes()
    }
}

impl fmt::Display for DepositKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Deposit lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Seen on chain, below the confirmation threshold
    Pending,
    /// At or above the confirmation threshold, not yet credited
    Confirmed,
    /// Wallet credited; terminal unless a reorg flags it
    Credited,
    /// Confirmation depth fell back below threshold after crediting
    ///
    /// Raised as an operational alert; the credit is never reversed
    /// automatically.
    Flagged,
}

/// An on-chain deposit to a known receiving address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcDeposit {
    /// Natural key (txid, vout)
    pub key: DepositKey,

    /// Merchant credited by this deposit
    pub merchant_id: Uuid,

    /// Purpose of the receiving address
    pub purpose: AddressPurpose,

    /// Receiving address
    pub address: String,

    /// Deposit amount in satoshis
    pub amount_sats: u64,

    /// Confirmation depth at last check (0 = unconfirmed)
    pub confirmations: u64,

    /// Block height of the containing block, if confirmed
    pub block_height: Option<u64>,

    /// Current status
    pub status: DepositStatus,

    /// Ledger entry written by the credit, once linked
    pub wallet_transaction_id: Option<Uuid>,

    /// First seen timestamp
    pub first_seen_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Order status, as driven by the funding subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Waiting for wallet funds to cover the estimate
    AwaitingFunds,
    /// Funds reserved; ready for fulfillment
    Funded,
    /// Shipped and settled (terminal)
    Shipped,
    /// Cannot proceed automatically; parked for operator review
    OnHoldCompliance,
}

/// One order line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Product
    pub product_id: Uuid,

    /// Requested quantity
    pub quantity: u32,

    /// Unit price in minor units
    pub unit_price_cents: i64,
}

impl OrderLine {
    /// Line total in minor units
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// A merchant order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub id: Uuid,

    /// Ordering merchant
    pub merchant_id: Uuid,

    /// Wallet currency the order is funded from
    pub currency: Currency,

    /// Order lines
    pub lines: Vec<OrderLine>,

    /// Cost estimate at creation, in minor units
    pub total_estimate_cents: i64,

    /// Actual cost, set at settlement
    pub actual_total_cents: Option<i64>,

    /// Current status
    pub status: OrderStatus,

    /// Wallet the reservation was taken against
    pub wallet_id: Option<Uuid>,

    /// When the order became Funded
    pub funded_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Stocked inventory for one product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Product ID (also the row key)
    pub product_id: Uuid,

    /// Units on hand
    pub on_hand: u32,

    /// Units reserved for funded or in-flight orders
    pub reserved: u32,
}

impl InventoryItem {
    /// Units that can still be promised to new orders
    pub fn sellable(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }
}
