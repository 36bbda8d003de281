//! Configuration for the BTC gateway

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Esplora-style provider base URL
    pub esplora_url: String,

    /// Fixed delay between provider requests, in milliseconds
    pub request_delay_ms: u64,

    /// Bitcoin network
    pub network: Network,

    /// Extended public key for top-up addresses
    pub topup_xpub: String,

    /// Extended public key for tip addresses
    pub tip_xpub: String,

    /// Confirmations required before a deposit credits
    pub confirmation_threshold: u64,

    /// Extra depth beyond the threshold during which credited deposits
    /// are still re-checked for reorgs
    pub reorg_horizon: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            esplora_url: "https://blockstream.info/api".to_string(),
            request_delay_ms: 250,
            network: Network::Bitcoin,
            topup_xpub: String::new(),
            tip_xpub: String::new(),
            confirmation_threshold: 3,
            reorg_horizon: 12,
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

        if let Ok(url) = std::env::var("BTC_ESPLORA_URL") {
            config.esplora_url = url;
        }
        if let Ok(network) = std::env::var("BTC_NETWORK") {
            config.network = network
                .parse()
                .map_err(|e| crate::Error::Config(format!("BTC_NETWORK: {}", e)))?;
        }
        if let Ok(key) = std::env::var("BTC_TOPUP_XPUB") {
            config.topup_xpub = key;
        }
        if let Ok(key) = std::env::var("BTC_TIP_XPUB") {
            config.tip_xpub = key;
        }
        if let Ok(threshold) = std::env::var("BTC_CONFIRMATION_THRESHOLD") {
            config.confirmation_threshold = threshold
                .parse()
                .map_err(|e| crate::Error::Config(format!("BTC_CONFIRMATION_THRESHOLD: {}", e)))?;
        }

        Ok(config)
    }
}
