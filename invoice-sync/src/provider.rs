//! Fiat invoicing provider client
//!
//! The sync consumes the provider behind [`InvoicingProvider`] so tests
//! can script statuses. Provider amounts travel as decimal strings;
//! they are parsed exactly with [`rust_decimal`] and converted to minor
//! units at this boundary, never inside the ledger.

use crate::error::{Error, Result};
use async_trait::async_trait;
use ledger_store::Currency;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Invoice status as the provider reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    /// Issued, unpaid
    Unpaid,
    /// Payment initiated but not settled
    Processing,
    /// Settled
    Paid,
    /// Cancelled
    Cancelled,
    /// Anything this client does not recognize
    Unknown,
}

impl ProviderStatus {
    /// Parse the provider's status string
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "unpaid" => ProviderStatus::Unpaid,
            "processing" => ProviderStatus::Processing,
            "paid" => ProviderStatus::Paid,
            "cancelled" | "canceled" => ProviderStatus::Cancelled,
            _ => ProviderStatus::Unknown,
        }
    }
}

/// A freshly created provider invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    /// Provider-side invoice id
    pub external_id: String,

    /// Provider-side invoice number
    pub number: String,

    /// Hosted payment URL
    pub pay_url: String,
}

/// Invoicing provider interface
#[async_trait]
pub trait InvoicingProvider: Send + Sync {
    /// Create a top-up invoice
    async fn create_invoice(
        &self,
        merchant_id: Uuid,
        amount_cents: i64,
        currency: Currency,
        memo: &str,
    ) -> Result<CreatedInvoice>;

    /// Current status of an invoice
    async fn invoice_status(&self, external_id: &str) -> Result<ProviderStatus>;
}

/// Convert minor units to the provider's decimal representation
pub fn cents_to_decimal(amount_cents: i64) -> Decimal {
    Decimal::new(amount_cents, 2)
}

/// Parse a provider decimal amount string into minor units, exactly
pub fn parse_amount_cents(s: &str) -> Result<i64> {
    let amount = Decimal::from_str(s).map_err(|e| Error::Amount(format!("{:?}: {}", s, e)))?;
    let cents = amount * Decimal::from(100);
    if cents.fract() != Decimal::ZERO {
        return Err(Error::Amount(format!("{:?} has sub-cent precision", s)));
    }
    cents
        .trunc()
        .to_i64()
        .ok_or_else(|| Error::Amount(format!("{:?} out of range", s)))
}

// Mercury wire types

#[derive(Serialize)]
struct CreateInvoiceRequest<'a> {
    recipient_reference: String,
    amount: Decimal,
    currency: &'a str,
    memo: &'a str,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    id: String,
    invoice_number: String,
    payment_url: String,
}

#[derive(Deserialize)]
struct InvoiceStatusResponse {
    status: String,
}

/// Mercury HTTP client
pub struct MercuryClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl MercuryClient {
    /// Create a client against the Mercury API
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl InvoicingProvider for MercuryClient {
    async fn create_invoice(
        &self,
        merchant_id: Uuid,
        amount_cents: i64,
        currency: Currency,
        memo: &str,
    ) -> Result<CreatedInvoice> {
        let url = format!("{}/invoices", self.base_url);
        let request = CreateInvoiceRequest {
            recipient_reference: merchant_id.to_string(),
            amount: cents_to_decimal(amount_cents),
            currency: currency.code(),
            memo,
        };
        let response: InvoiceResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(CreatedInvoice {
            external_id: response.id,
            number: response.invoice_number,
            pay_url: response.payment_url,
        })
    }

    async fn invoice_status(&self, external_id: &str) -> Result<ProviderStatus> {
        let url = format!("{}/invoices/{}", self.base_url, external_id);
        let response: InvoiceStatusResponse = self
            .http
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ProviderStatus::parse(&response.status))
    }
}
