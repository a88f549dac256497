//! Deterministic credit cost and latency for a single invocation.

mod costing;

use std::time::{Duration, Instant};

use thiserror::Error;

pub use costing::{BUILTIN_COST_RATES, CostRateError, CostRateTable};

use crate::entities::Project;
use crate::schema::Record;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeteringError {
    #[error("no cost rate configured for model {model}")]
    UnknownModelCostRate { model: String },
}

/// UTF-8 byte length of both canonical payloads plus the instructions.
pub fn billable_chars(instructions: &str, request: &Record, response: &Record) -> u64 {
    let total = response.to_canonical_json().len()
        + request.to_canonical_json().len()
        + instructions.len();
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Credits charged for one successful round trip of `project`.
pub fn meter(
    rates: &CostRateTable,
    project: &Project,
    request: &Record,
    response: &Record,
) -> Result<u64, MeteringError> {
    let chars = billable_chars(&project.instructions, request, response);
    rates.credits_for(&project.model, chars)
}

/// Seconds rounded to milliseconds.
pub fn round_latency(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy)]
pub struct LatencyTimer {
    started: Instant,
}

impl LatencyTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        round_latency(self.started.elapsed())
    }
}
