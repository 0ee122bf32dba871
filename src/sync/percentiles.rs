//! Percentile engine.
//!
//! Ranks each tracked metric of a test against the athlete's cohort and the
//! overall population, then appends one history row per metric. Runs for
//! every processed test, stored before or not.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::athletes::Cohort;
use crate::metrics::disciplines::{Discipline, MetricSet};
use crate::metrics::percentile::{PercentileHistoryEntry, PercentilePair};
use crate::storage::{ContributionOutcome, DatabaseError, PercentileStore};

/// Percentile engine. Stateless; every input comes from the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileEngine;

impl PercentileEngine {
    pub fn new() -> Self {
        Self
    }

    /// Rank and record the tracked metrics of one test.
    ///
    /// Metrics the test did not produce are skipped. A metric without any
    /// reference population is recorded with unavailable percentiles.
    /// Afterwards the athlete's contribution for the discipline is refreshed
    /// on a best-effort basis.
    #[allow(clippy::too_many_arguments)]
    pub fn record_percentiles(
        &self,
        conn: &Connection,
        athlete_id: &Uuid,
        discipline: Discipline,
        provider_test_id: &str,
        metrics: &MetricSet,
        test_date: &DateTime<Utc>,
        cohort: Cohort,
    ) -> Result<Vec<PercentileHistoryEntry>, DatabaseError> {
        let store = PercentileStore::new(conn);
        let computed_at = Utc::now();
        let mut entries = Vec::with_capacity(discipline.tracked_metrics().len());

        for &metric in discipline.tracked_metrics() {
            let Some(value) = metrics.get(metric) else {
                tracing::debug!(
                    "{} test {} has no {}, not ranked",
                    discipline,
                    provider_test_id,
                    metric
                );
                continue;
            };

            let cohort_population = store.reference_population(discipline, metric, Some(cohort))?;
            let overall_population = store.reference_population(discipline, metric, None)?;
            let pair = PercentilePair::compute(&cohort_population, &overall_population, value);

            if pair.is_unavailable() {
                tracing::debug!("{} {}: no reference population yet", discipline, metric);
            } else {
                tracing::debug!(
                    "{} {} = {:.2}: cohort {:?} (n={}), overall {:?} (n={})",
                    discipline,
                    metric,
                    value,
                    pair.cohort,
                    cohort_population.len(),
                    pair.overall,
                    overall_population.len()
                );
            }

            let entry = PercentileHistoryEntry {
                athlete_id: *athlete_id,
                discipline,
                provider_test_id: provider_test_id.to_string(),
                metric: metric.to_string(),
                value,
                cohort,
                percentile_cohort: pair.cohort,
                percentile_overall: pair.overall,
                test_date: *test_date,
                computed_at,
            };
            store.append_history(&entry)?;
            entries.push(entry);
        }

        self.refresh_contribution(&store, athlete_id, discipline, cohort);

        Ok(entries)
    }

    fn refresh_contribution(
        &self,
        store: &PercentileStore<'_>,
        athlete_id: &Uuid,
        discipline: Discipline,
        cohort: Cohort,
    ) {
        match store.refresh_contribution(athlete_id, discipline, cohort) {
            Ok(ContributionOutcome::Contributed(count)) => {
                tracing::debug!(
                    "Athlete {} contributes {} {} metrics to {}",
                    athlete_id,
                    count,
                    discipline,
                    cohort
                );
            }
            Ok(ContributionOutcome::Ineligible { distinct_tests }) => {
                tracing::debug!(
                    "Athlete {} not yet contributing {} ({} distinct tests)",
                    athlete_id,
                    discipline,
                    distinct_tests
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Contribution refresh failed for athlete {} {}: {}",
                    athlete_id,
                    discipline,
                    e
                );
            }
        }
    }
}
