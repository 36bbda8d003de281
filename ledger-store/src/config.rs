//! Configuration for the ledger store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the RocksDB instance
    pub data_dir: PathBuf,

    /// RocksDB tuning
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// RocksDB tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size in MB
    pub write_buffer_size_mb: usize,

    /// Maximum number of write buffers
    pub max_write_buffer_number: i32,

    /// Maximum background jobs
    pub max_background_jobs: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 4,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}
