//! Configuration for the funding engines

use ledger_store::Currency;
use serde::{Deserialize, Serialize};

/// Funding configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-currency compliance reserves
    pub compliance_reserves: ComplianceReserves,
}

/// Fixed per-currency buffers held back from order funding
///
/// Subtracted from the available balance before every reservation check;
/// funds under the reserve can never be promised to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReserves {
    /// Buffer for fiat wallets, in minor units
    pub fiat_cents: i64,

    /// Buffer for BTC wallets, in satoshis
    pub btc_sats: i64,
}

impl Default for ComplianceReserves {
    fn default() -> Self {
        Self {
            fiat_cents: 50_000,
            btc_sats: 0,
        }
    }
}

impl ComplianceReserves {
    /// Reserve held back for one currency
    pub fn for_currency(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Btc => self.btc_sats,
            _ => self.fiat_cents,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(cents) = std::env::var("FUNDING_FIAT_RESERVE_CENTS") {
            config.compliance_reserves.fiat_cents = cents
                .parse()
                .map_err(|e| crate::Error::Config(format!("FUNDING_FIAT_RESERVE_CENTS: {}", e)))?;
        }
        if let Ok(sats) = std::env::var("FUNDING_BTC_RESERVE_SATS") {
            config.compliance_reserves.btc_sats = sats
                .parse()
                .map_err(|e| crate::Error::Config(format!("FUNDING_BTC_RESERVE_SATS: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reserves() {
        let reserves = ComplianceReserves::default();
        assert_eq!(reserves.for_currency(Currency::Usd), 50_000);
        assert_eq!(reserves.for_currency(Currency::Eur), 50_000);
        assert_eq!(reserves.for_currency(Currency::Btc), 0);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [compliance_reserves]
            fiat_cents = 75000
            btc_sats = 10000
            "#,
        )
        .unwrap();
        assert_eq!(config.compliance_reserves.fiat_cents, 75_000);
        assert_eq!(config.compliance_reserves.for_currency(Currency::Btc), 10_000);
    }
}
