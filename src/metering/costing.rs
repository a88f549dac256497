use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;

use super::MeteringError;

/// Characters per credit for the models every deployment knows about.
pub const BUILTIN_COST_RATES: &[(&str, u64)] = &[("gpt-35-turbo", 500), ("gpt-4", 50)];

/// Per-model divisor turning payload characters into credits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostRateTable {
    rates: HashMap<String, u64>,
}

#[derive(Debug, Error)]
pub enum CostRateError {
    #[error("invalid cost rate json: expected object at root")]
    InvalidRoot,
    #[error("invalid cost rate for model {model}: expected a positive integer")]
    InvalidRate { model: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Default for CostRateTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CostRateTable {
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self {
            rates: BUILTIN_COST_RATES
                .iter()
                .map(|(model, rate)| ((*model).to_string(), *rate))
                .collect(),
        }
    }

    /// Built-in rates overridden or extended by `overrides`.
    pub fn with_overrides(overrides: &BTreeMap<String, u64>) -> Result<Self, CostRateError> {
        let mut table = Self::builtin();
        for (model, rate) in overrides {
            table.insert(model.as_str(), *rate)?;
        }
        Ok(table)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CostRateError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_json_value(&value)
    }

    pub fn from_json_value(value: &Value) -> Result<Self, CostRateError> {
        let Some(root) = value.as_object() else {
            return Err(CostRateError::InvalidRoot);
        };
        let mut table = Self::empty();
        for (model, entry) in root {
            let rate = entry.as_u64().ok_or_else(|| CostRateError::InvalidRate {
                model: model.clone(),
            })?;
            table.insert(model.as_str(), rate)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, model: impl Into<String>, rate: u64) -> Result<(), CostRateError> {
        let model = model.into();
        if rate == 0 {
            return Err(CostRateError::InvalidRate { model });
        }
        self.rates.insert(model, rate);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn rate(&self, model: &str) -> Result<u64, MeteringError> {
        self.rates
            .get(model)
            .copied()
            .ok_or_else(|| MeteringError::UnknownModelCostRate {
                model: model.to_string(),
            })
    }

    /// `ceil(chars / rate(model))`.
    pub fn credits_for(&self, model: &str, chars: u64) -> Result<u64, MeteringError> {
        Ok(chars.div_ceil(self.rate(model)?))
    }
}
