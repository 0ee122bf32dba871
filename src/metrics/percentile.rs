//! Empirical percentile ranks.
//!
//! Percentile of `v` against a population of `N` samples is
//! `count(samples <= v) / N * 100` (inclusive rank). The population maximum
//! ranks 100, the minimum ranks `100 / N`, and an empty population has no
//! percentile at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::athletes::Cohort;
use crate::metrics::disciplines::Discipline;

/// A sorted reference population for one metric.
#[derive(Debug, Clone, Default)]
pub struct ReferencePopulation {
    samples: Vec<f64>,
}

impl ReferencePopulation {
    /// Build from unsorted samples. Non-finite samples are dropped.
    pub fn new(mut samples: Vec<f64>) -> Self {
        samples.retain(|v| v.is_finite());
        samples.sort_by(f64::total_cmp);
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Inclusive percentile rank of `value`, or `None` for an empty
    /// population or a non-finite value.
    pub fn percentile_of(&self, value: f64) -> Option<f64> {
        if self.samples.is_empty() || !value.is_finite() {
            return None;
        }

        let at_or_below = self.samples.partition_point(|s| *s <= value);
        Some(at_or_below as f64 / self.samples.len() as f64 * 100.0)
    }
}

/// Convenience wrapper over [`ReferencePopulation::percentile_of`].
pub fn percentile_rank(samples: &[f64], value: f64) -> Option<f64> {
    ReferencePopulation::new(samples.to_vec()).percentile_of(value)
}

/// Percentiles of one value against the cohort and overall populations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentilePair {
    /// Rank within the athlete's play level; `None` when unavailable
    pub cohort: Option<f64>,
    /// Rank across all play levels; `None` when unavailable
    pub overall: Option<f64>,
}

impl PercentilePair {
    pub fn compute(cohort: &ReferencePopulation, overall: &ReferencePopulation, value: f64) -> Self {
        Self {
            cohort: cohort.percentile_of(value),
            overall: overall.percentile_of(value),
        }
    }

    /// Neither population had samples.
    pub fn is_unavailable(&self) -> bool {
        self.cohort.is_none() && self.overall.is_none()
    }
}

/// One append-only percentile record for one tracked metric of one test.
///
/// Rows are never updated; the newest `computed_at` for a given
/// (athlete, discipline, test, metric) is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileHistoryEntry {
    pub athlete_id: Uuid,
    pub discipline: Discipline,
    pub provider_test_id: String,
    pub metric: String,
    pub value: f64,
    /// Cohort the ranks were computed against
    pub cohort: Cohort,
    pub percentile_cohort: Option<f64>,
    pub percentile_overall: Option<f64>,
    /// When the test was recorded
    pub test_date: DateTime<Utc>,
    /// When this row was written
    pub computed_at: DateTime<Utc>,
}

impl PercentileHistoryEntry {
    pub fn percentiles(&self) -> PercentilePair {
        PercentilePair {
            cohort: self.percentile_cohort,
            overall: self.percentile_overall,
        }
    }
}
