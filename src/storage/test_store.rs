//! Per-discipline stored tests.
//!
//! Exactly one row exists per (provider test, athlete) in each discipline
//! table. The writer looks the row up before inserting so a re-synced test
//! still hands its metrics downstream for re-percentiling.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::integrations::forcedecks::TrialRecord;
use crate::metrics::disciplines::{kg_to_lb_rounded, Discipline, MetricSet};
use crate::storage::athlete_store::AthleteStore;
use crate::storage::database::{format_timestamp, parse_timestamp, with_savepoint, DatabaseError};

/// What `store_test` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// New row written with these metrics
    Inserted(MetricSet),
    /// Row already existed; these are its stored metrics
    AlreadyStored(MetricSet),
    /// Provider returned no trials; nothing written
    EmptyTrialSet,
}

impl StoreOutcome {
    /// Whether a new row was written.
    pub fn was_inserted(&self) -> bool {
        matches!(self, StoreOutcome::Inserted(_))
    }

    /// Metrics to percentile, if any.
    pub fn metrics(&self) -> Option<&MetricSet> {
        match self {
            StoreOutcome::Inserted(m) | StoreOutcome::AlreadyStored(m) => Some(m),
            StoreOutcome::EmptyTrialSet => None,
        }
    }
}

/// One persisted test.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTest {
    pub provider_test_id: String,
    pub athlete_id: Uuid,
    pub discipline: Discipline,
    pub recorded_at: DateTime<Utc>,
    pub trial_count: u32,
    pub body_weight_kg: Option<f64>,
    pub metrics: MetricSet,
    pub created_at: DateTime<Utc>,
}

/// Test store over a borrowed connection.
pub struct TestStore<'a> {
    conn: &'a Connection,
}

impl<'a> TestStore<'a> {
    /// Create a new test store with the given connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Store one provider test.
    ///
    /// Empty trial sets are a known provider artifact and are a no-op.
    pub fn store_test(
        &self,
        discipline: Discipline,
        trials: &[TrialRecord],
        provider_test_id: &str,
        athlete_id: &Uuid,
        recorded_at: &DateTime<Utc>,
    ) -> Result<StoreOutcome, DatabaseError> {
        if trials.is_empty() {
            tracing::info!(
                "Skipping {} test {}: provider returned no trials",
                discipline,
                provider_test_id
            );
            return Ok(StoreOutcome::EmptyTrialSet);
        }

        if let Some(existing) = self.find_test(discipline, provider_test_id, athlete_id)? {
            tracing::debug!(
                "{} test {} already stored for athlete {}",
                discipline,
                provider_test_id,
                athlete_id
            );
            return Ok(StoreOutcome::AlreadyStored(existing.metrics));
        }

        let metrics = discipline.strategy().extract(trials);
        let metrics_json = serde_json::to_string(&metrics)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (provider_test_id, athlete_id, recorded_at, trial_count,
                     body_weight_kg, metrics_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    discipline.table_name()
                ),
                params![
                    provider_test_id,
                    athlete_id.to_string(),
                    format_timestamp(recorded_at),
                    trials.len() as u32,
                    metrics.body_weight_kg(),
                    metrics_json,
                    format_timestamp(&Utc::now()),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tracing::info!(
            "Stored {} test {} for athlete {} ({} metrics from {} trials)",
            discipline,
            provider_test_id,
            athlete_id,
            metrics.len(),
            trials.len()
        );

        if discipline == Discipline::CounterMovementJump {
            let refreshed = with_savepoint(self.conn, "bodyweight", || {
                self.refresh_bodyweight(athlete_id)
            });
            if let Err(e) = refreshed {
                tracing::warn!("Bodyweight update failed for athlete {}: {}", athlete_id, e);
            }
        }

        Ok(StoreOutcome::Inserted(metrics))
    }

    /// Copy the most recent CMJ bodyweight onto the athlete record.
    ///
    /// Returns the displayed value in pounds, or `None` when no CMJ test
    /// carried a bodyweight.
    pub fn refresh_bodyweight(&self, athlete_id: &Uuid) -> Result<Option<f64>, DatabaseError> {
        let latest_kg: Option<f64> = self
            .conn
            .query_row(
                "SELECT body_weight_kg FROM cmj_tests
                 WHERE athlete_id = ?1 AND body_weight_kg IS NOT NULL
                 ORDER BY recorded_at DESC, created_at DESC LIMIT 1",
                params![athlete_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let Some(kg) = latest_kg else {
            return Ok(None);
        };

        let lb = kg_to_lb_rounded(kg);
        AthleteStore::new(self.conn).set_bodyweight(athlete_id, lb)?;
        Ok(Some(lb))
    }

    /// Look up one stored test.
    pub fn find_test(
        &self,
        discipline: Discipline,
        provider_test_id: &str,
        athlete_id: &Uuid,
    ) -> Result<Option<StoredTest>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT provider_test_id, athlete_id, recorded_at, trial_count, body_weight_kg,
                     metrics_json, created_at FROM {}
                     WHERE provider_test_id = ?1 AND athlete_id = ?2",
                    discipline.table_name()
                ),
                params![provider_test_id, athlete_id.to_string()],
                StoredTestRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(|r| r.into_stored_test(discipline)).transpose()
    }

    /// All of an athlete's tests of one discipline, oldest first.
    pub fn tests_for(
        &self,
        discipline: Discipline,
        athlete_id: &Uuid,
    ) -> Result<Vec<StoredTest>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT provider_test_id, athlete_id, recorded_at, trial_count, body_weight_kg,
                 metrics_json, created_at FROM {}
                 WHERE athlete_id = ?1 ORDER BY recorded_at ASC, created_at ASC",
                discipline.table_name()
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![athlete_id.to_string()], StoredTestRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut tests = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            tests.push(row.into_stored_test(discipline)?);
        }

        Ok(tests)
    }

    /// All of an athlete's tests across every discipline, oldest first.
    pub fn stored_tests(&self, athlete_id: &Uuid) -> Result<Vec<StoredTest>, DatabaseError> {
        let mut tests = Vec::new();
        for discipline in Discipline::ALL {
            tests.extend(self.tests_for(discipline, athlete_id)?);
        }
        tests.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then(a.created_at.cmp(&b.created_at))
        });

        Ok(tests)
    }

    /// Most recent test of one discipline.
    pub fn latest_test(
        &self,
        discipline: Discipline,
        athlete_id: &Uuid,
    ) -> Result<Option<StoredTest>, DatabaseError> {
        Ok(self.tests_for(discipline, athlete_id)?.pop())
    }

    /// Number of distinct provider tests of one discipline.
    pub fn count_distinct_tests(
        &self,
        discipline: Discipline,
        athlete_id: &Uuid,
    ) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                &format!(
                    "SELECT COUNT(DISTINCT provider_test_id) FROM {} WHERE athlete_id = ?1",
                    discipline.table_name()
                ),
                params![athlete_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }
}

/// Intermediate struct for reading stored test rows from database.
struct StoredTestRow {
    provider_test_id: String,
    athlete_id: String,
    recorded_at: String,
    trial_count: u32,
    body_weight_kg: Option<f64>,
    metrics_json: String,
    created_at: String,
}

impl StoredTestRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            provider_test_id: row.get(0)?,
            athlete_id: row.get(1)?,
            recorded_at: row.get(2)?,
            trial_count: row.get(3)?,
            body_weight_kg: row.get(4)?,
            metrics_json: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_stored_test(self, discipline: Discipline) -> Result<StoredTest, DatabaseError> {
        let athlete_id = Uuid::parse_str(&self.athlete_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid athlete UUID: {}", e))
        })?;

        let metrics: MetricSet = serde_json::from_str(&self.metrics_json).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid metrics JSON: {}", e))
        })?;

        Ok(StoredTest {
            provider_test_id: self.provider_test_id,
            athlete_id,
            discipline,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            trial_count: self.trial_count,
            body_weight_kg: self.body_weight_kg,
            metrics,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
