//! Engine configuration loaded from TOML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metering::{CostRateError, CostRateTable};
use crate::profile::ProviderConfig;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_CREDITS: u64 = 1000;
pub const DEFAULT_MODEL: &str = "gpt-35-turbo";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing api key env (tried: {0})")]
    MissingApiKey(String),
    #[error("invalid provider auth: {0}")]
    InvalidAuth(String),
    #[error(transparent)]
    CostRate(#[from] CostRateError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub listen: String,
    pub provider: ProviderConfig,
    /// Characters per credit, merged over the built-in table.
    pub cost_rates: BTreeMap<String, u64>,
    pub default_credits: u64,
    pub default_model: String,
    pub store: StoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            provider: ProviderConfig::default(),
            cost_rates: BTreeMap::new(),
            default_credits: DEFAULT_CREDITS,
            default_model: DEFAULT_MODEL.to_string(),
            store: StoreConfig::Memory,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&raw)
    }

    pub fn cost_rate_table(&self) -> Result<CostRateTable, ConfigError> {
        Ok(CostRateTable::with_overrides(&self.cost_rates)?)
    }
}
