//! Sync orchestrator.
//!
//! Runs one athlete through identity resolution, the changed-tests listing,
//! per-test store and percentile, and the two composite passes. Each test is
//! committed in its own transaction so a failure or cancellation never
//! leaves half a test behind.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use uuid::Uuid;

use super::{
    BatchFailure, BatchSummary, CompositeAggregator, PercentileEngine, RecomputeSummary,
    RunState, SyncError, SyncResult,
};
use crate::athletes::{AthleteProfile, Cohort};
use crate::integrations::forcedecks::{ExternalTestRef, TestProvider};
use crate::storage::{AthleteStore, PercentileStore, ServiceWriter, StoreOutcome, SyncSettings, TestStore};

/// Entry point of the sync pipeline.
///
/// Writes go through the [`ServiceWriter`] handed in at construction; the
/// orchestrator never reaches for a database on its own.
pub struct SyncOrchestrator<P: TestProvider> {
    provider: P,
    writer: ServiceWriter,
    settings: SyncSettings,
    engine: PercentileEngine,
    aggregator: CompositeAggregator,
}

impl<P: TestProvider> SyncOrchestrator<P> {
    pub fn new(provider: P, writer: ServiceWriter, settings: SyncSettings) -> Self {
        let aggregator = CompositeAggregator::new(settings.rolling_window_days);
        Self {
            provider,
            writer,
            settings,
            engine: PercentileEngine::new(),
            aggregator,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn enter(&self, athlete_id: &Uuid, state: RunState) {
        tracing::debug!("Sync {}: {}", athlete_id, state);
    }

    fn load_athlete(&self, athlete_id: &Uuid) -> Result<AthleteProfile, SyncError> {
        self.writer
            .with_conn(|conn| AthleteStore::new(conn).get_athlete(athlete_id))?
            .ok_or(SyncError::AthleteNotFound(*athlete_id))
    }

    /// Provider profile id of the athlete, resolving a pending link once.
    async fn resolve_identity(&self, athlete: &AthleteProfile) -> Result<String, SyncError> {
        if let Some(external_id) = athlete.external_id.as_ref() {
            return Ok(external_id.clone());
        }

        let Some(pending) = athlete.pending_link_id.as_deref() else {
            return Err(SyncError::NoExternalLink(athlete.id));
        };

        match self.provider.resolve_profile_id(pending).await? {
            Some(external_id) => {
                self.writer.with_conn(|conn| {
                    AthleteStore::new(conn).set_external_id(&athlete.id, &external_id)
                })?;
                tracing::info!("Linked athlete {} to provider profile {}", athlete.id, external_id);
                Ok(external_id)
            }
            None => {
                tracing::warn!("Pending link {} for athlete {} is not resolvable yet", pending, athlete.id);
                Err(SyncError::NoExternalLink(athlete.id))
            }
        }
    }

    /// Sync one athlete.
    ///
    /// Run-level problems (unknown athlete, no link, no cohort, listing
    /// failure) abort with an error. Per-test failures are collected into
    /// the result and the run continues.
    pub async fn sync_athlete(&self, athlete_id: Uuid) -> Result<SyncResult, SyncError> {
        self.enter(&athlete_id, RunState::Idle);
        let athlete = self.load_athlete(&athlete_id)?;

        self.enter(&athlete_id, RunState::ResolvingIdentity);
        let external_id = self.resolve_identity(&athlete).await?;
        let cohort = athlete.cohort.ok_or(SyncError::CohortMissing(athlete_id))?;

        self.enter(&athlete_id, RunState::Fetching);
        let since = Utc::now() - self.settings.lookback();
        let changed = self.provider.fetch_changed_tests(&external_id, since).await?;

        tracing::info!(
            "Syncing athlete {} ({}): {} tests found since {}",
            athlete_id,
            cohort,
            changed.total_found(),
            since.format("%Y-%m-%d")
        );

        let mut errors: Vec<String> = changed
            .unsupported
            .iter()
            .map(|t| format!("Test {}: unsupported test type {}", t.provider_test_id, t.test_type))
            .collect();

        let total = changed.tests.len();
        let mut tests_synced = 0;
        for (index, test) in changed.tests.iter().enumerate() {
            self.enter(&athlete_id, RunState::ProcessingTests { index: index + 1, total });

            match self.process_test(&athlete_id, cohort, test).await {
                Ok(true) => tests_synced += 1,
                Ok(false) => {}
                Err(reason) => {
                    tracing::error!(
                        "Test {} ({}) failed for athlete {}: {}",
                        test.provider_test_id,
                        test.discipline,
                        athlete_id,
                        reason
                    );
                    errors.push(format!(
                        "Test {} ({}): {}",
                        test.provider_test_id, test.discipline, reason
                    ));
                }
            }
        }

        self.enter(&athlete_id, RunState::Aggregating);
        let sync_timestamp = Utc::now();
        self.aggregate(&athlete_id, cohort, Some(&sync_timestamp))?;

        let result = SyncResult {
            success: true,
            tests_synced,
            total_tests_found: changed.total_found(),
            sync_timestamp,
            errors: (!errors.is_empty()).then_some(errors),
        };

        let state = result.state();
        self.enter(&athlete_id, state);
        tracing::info!(
            "Sync of athlete {} finished ({}): {}/{} tests stored",
            athlete_id,
            state,
            result.tests_synced,
            result.total_tests_found
        );

        Ok(result)
    }

    /// Fetch, store and percentile one test. `Ok(true)` when newly stored.
    async fn process_test(
        &self,
        athlete_id: &Uuid,
        cohort: Cohort,
        test: &ExternalTestRef,
    ) -> Result<bool, String> {
        let trials = self
            .provider
            .fetch_trials(&test.provider_test_id)
            .await
            .map_err(|e| e.to_string())?;

        self.writer
            .with_transaction(|tx| {
                let outcome = TestStore::new(tx).store_test(
                    test.discipline,
                    &trials,
                    &test.provider_test_id,
                    athlete_id,
                    &test.recorded_at,
                )?;

                if let Some(metrics) = outcome.metrics() {
                    self.engine.record_percentiles(
                        tx,
                        athlete_id,
                        test.discipline,
                        &test.provider_test_id,
                        metrics,
                        &test.recorded_at,
                        cohort,
                    )?;
                }

                Ok(outcome)
            })
            .map(|outcome| matches!(outcome, StoreOutcome::Inserted(_)))
            .map_err(|e| e.to_string())
    }

    /// Rerun both composites and optionally stamp the sync time.
    fn aggregate(
        &self,
        athlete_id: &Uuid,
        cohort: Cohort,
        synced_at: Option<&DateTime<Utc>>,
    ) -> Result<(Option<f64>, Option<f64>), SyncError> {
        let scores = self.writer.with_transaction(|tx| {
            let rolling = self.aggregator.update_rolling_composite(tx, athlete_id, cohort)?;
            let profile = self.aggregator.update_force_profile_composite(tx, athlete_id, cohort)?;
            if let Some(at) = synced_at {
                AthleteStore::new(tx).mark_synced(athlete_id, at)?;
            }
            Ok((
                rolling.and_then(|s| s.headline()),
                profile.and_then(|s| s.headline()),
            ))
        })?;

        Ok(scores)
    }

    /// Reclassify an athlete and recompute everything that depends on the
    /// cohort.
    ///
    /// Existing history rows stay as a dated record; every stored test gets
    /// a newer row ranked against the new cohort, which supersedes them.
    pub fn recompute_all(&self, athlete_id: Uuid, new_cohort: Cohort) -> Result<RecomputeSummary, SyncError> {
        let athlete = self.load_athlete(&athlete_id)?;
        if let Some(previous) = athlete.cohort {
            tracing::info!("Reclassifying athlete {}: {} -> {}", athlete_id, previous, new_cohort);
        }

        let (tests_recomputed, history_rows, contributions_moved) =
            self.writer.with_transaction(|tx| {
                AthleteStore::new(tx).set_cohort(&athlete_id, new_cohort)?;
                let moved = PercentileStore::new(tx).move_contributions(&athlete_id, new_cohort)?;

                let tests = TestStore::new(tx).stored_tests(&athlete_id)?;
                let mut rows = 0;
                for test in &tests {
                    rows += self
                        .engine
                        .record_percentiles(
                            tx,
                            &athlete_id,
                            test.discipline,
                            &test.provider_test_id,
                            &test.metrics,
                            &test.recorded_at,
                            new_cohort,
                        )?
                        .len();
                }

                Ok((tests.len(), rows, moved))
            })?;

        let (composite_score, force_profile_composite) = self.aggregate(&athlete_id, new_cohort, None)?;

        tracing::info!(
            "Recomputed athlete {}: {} tests, {} history rows",
            athlete_id,
            tests_recomputed,
            history_rows
        );

        Ok(RecomputeSummary {
            athlete_id,
            cohort: new_cohort,
            tests_recomputed,
            history_rows,
            contributions_moved,
            composite_score,
            force_profile_composite,
        })
    }

    /// Sync every athlete with a provider link or pending link.
    ///
    /// Athletes run concurrently up to `max_concurrent_athletes`; one
    /// athlete's failure never stops the others.
    pub async fn sync_all_linked(&self) -> Result<BatchSummary, SyncError> {
        let athletes = self
            .writer
            .with_conn(|conn| AthleteStore::new(conn).list_syncable())?;
        let limit = self.settings.max_concurrent_athletes.max(1);

        tracing::info!("Batch sync of {} athletes ({} at a time)", athletes.len(), limit);

        let outcomes: Vec<(Uuid, Result<SyncResult, SyncError>)> =
            futures::stream::iter(athletes.into_iter().map(move |athlete| async move {
                (athlete.id, self.sync_athlete(athlete.id).await)
            }))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut summary = BatchSummary {
            athletes: outcomes.len(),
            ..Default::default()
        };
        for (athlete_id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    summary.succeeded += 1;
                    summary.tests_synced += result.tests_synced;
                    if result.state() == RunState::PartialFailure {
                        summary.partial += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Sync of athlete {} failed: {}", athlete_id, e);
                    summary.failed += 1;
                    summary.failures.push(BatchFailure {
                        athlete_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        summary.failures.sort_by_key(|f| f.athlete_id);

        tracing::info!(
            "Batch sync done: {} succeeded, {} failed, {} tests stored",
            summary.succeeded,
            summary.failed,
            summary.tests_synced
        );

        Ok(summary)
    }
}
