//! Lazily refreshed rollups over invocation history.
//!
//! Staleness is detected by comparing the stored invocation count with the
//! current one. A delete plus an insert between two reads leaves the count
//! unchanged and is not detected.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::entities::{Document, Invocation, Project, User};
use crate::store::{Store, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub invocations: u64,
    pub credits_used: u64,
    pub latency_avg: f64,
    pub success_rate: f64,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            invocations: 0,
            credits_used: 0,
            latency_avg: 0.0,
            success_rate: 1.0,
        }
    }
}

impl UsageStats {
    /// Full fold; an empty history has zero latency and a perfect success rate.
    pub fn from_invocations(invocations: &[Invocation]) -> Self {
        if invocations.is_empty() {
            return Self::default();
        }
        let count = invocations.len() as f64;
        let credits_used = invocations
            .iter()
            .fold(0u64, |acc, inv| acc.saturating_add(inv.credits_used));
        let latency_total: f64 = invocations.iter().map(|inv| inv.latency_seconds).sum();
        let successes = invocations.iter().filter(|inv| inv.success).count() as f64;

        Self {
            invocations: invocations.len() as u64,
            credits_used,
            latency_avg: latency_total / count,
            success_rate: successes / count,
        }
    }

    /// Recomputes unless the stored count already matches. Returns whether
    /// anything was recomputed.
    pub fn refresh(&mut self, invocations: &[Invocation]) -> bool {
        if invocations.len() as u64 == self.invocations {
            return false;
        }
        *self = Self::from_invocations(invocations);
        true
    }
}

/// A document carrying rolled-up usage.
pub trait Rollup: Document {
    fn usage_mut(&mut self) -> &mut UsageStats;
}

impl Rollup for User {
    fn usage_mut(&mut self) -> &mut UsageStats {
        &mut self.usage
    }
}

impl Rollup for Project {
    fn usage_mut(&mut self) -> &mut UsageStats {
        &mut self.usage
    }
}

/// Refreshes `entity` and writes it back only when it changed.
pub async fn refresh<T: Rollup>(
    store: &Store,
    entity: &mut T,
    invocations: &[Invocation],
) -> Result<bool, StoreError> {
    if !entity.usage_mut().refresh(invocations) {
        tracing::debug!(
            collection = T::COLLECTION,
            id = entity.id(),
            "usage rollup is current"
        );
        return Ok(false);
    }
    store.save(&*entity).await?;
    Ok(true)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProjectSeries {
    pub project_id: String,
    pub counts: Vec<u64>,
}

/// Per-project daily invocation counts aligned on shared date labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsageSeries {
    pub labels: Vec<String>,
    pub series: Vec<ProjectSeries>,
}

const DATE_FORMAT: &[FormatItem<'_>] = format_description!("[year]-[month]-[day]");

pub(crate) fn date_label(timestamp_ms: u64) -> String {
    let seconds = i64::try_from(timestamp_ms / 1000).unwrap_or(i64::MAX);
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()
        .and_then(|datetime| datetime.format(DATE_FORMAT).ok())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Groups counts by project and UTC date. Labels are sorted and every
/// project gets a zero-filled vector of the same length.
pub fn usage_series(invocations: &[Invocation]) -> UsageSeries {
    let mut per_project = BTreeMap::<&str, BTreeMap<String, u64>>::new();
    let mut labels = BTreeSet::<String>::new();
    for invocation in invocations {
        let label = date_label(invocation.timestamp_ms);
        labels.insert(label.clone());
        *per_project
            .entry(invocation.project_id.as_str())
            .or_default()
            .entry(label)
            .or_default() += 1;
    }

    let labels = labels.into_iter().collect::<Vec<_>>();
    let series = per_project
        .into_iter()
        .map(|(project_id, by_date)| ProjectSeries {
            project_id: project_id.to_string(),
            counts: labels
                .iter()
                .map(|label| by_date.get(label).copied().unwrap_or(0))
                .collect(),
        })
        .collect();

    UsageSeries { labels, series }
}
