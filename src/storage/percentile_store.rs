//! Percentile history, reference populations and cohort contributions.
//!
//! Provides persistence for:
//! - Append-only percentile history
//! - Seeded reference samples
//! - Athlete contributions to the shared reference populations
//! - Append-only composite snapshots

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::athletes::Cohort;
use crate::metrics::composite::{
    authoritative_entries, force_profiles_by_date, CompositeKind, CompositeScore, DatedComposite,
};
use crate::metrics::disciplines::Discipline;
use crate::metrics::percentile::{PercentileHistoryEntry, ReferencePopulation};
use crate::storage::database::{format_timestamp, parse_timestamp, with_savepoint, DatabaseError};
use crate::storage::test_store::TestStore;

/// Minimum distinct tests of a discipline before an athlete's values join the
/// shared reference population.
pub const MIN_TESTS_TO_CONTRIBUTE: usize = 2;

/// One athlete's value inside a shared reference population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortContribution {
    pub athlete_id: Uuid,
    pub discipline: Discipline,
    pub metric: String,
    pub cohort: Cohort,
    /// Test the value was taken from
    pub provider_test_id: String,
    pub value: f64,
    pub test_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a contribution refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionOutcome {
    /// Rows upserted for this many metrics
    Contributed(usize),
    /// Not enough distinct tests yet
    Ineligible { distinct_tests: usize },
}

/// Normative samples for one population, as imported from a seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSeed {
    pub discipline: Discipline,
    pub metric: String,
    pub cohort: Cohort,
    pub values: Vec<f64>,
    #[serde(default)]
    pub source: Option<String>,
}

/// One persisted composite snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    pub kind: CompositeKind,
    pub cohort: Cohort,
    pub score_cohort: Option<f64>,
    pub score_overall: Option<f64>,
    pub disciplines: Vec<Discipline>,
    pub computed_at: DateTime<Utc>,
}

/// Percentile store over a borrowed connection.
pub struct PercentileStore<'a> {
    conn: &'a Connection,
}

impl<'a> PercentileStore<'a> {
    /// Create a new percentile store with the given connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ========== Reference populations ==========

    /// Reference population for one metric: seeded samples plus eligible
    /// athlete contributions. `cohort = None` selects every cohort.
    pub fn reference_population(
        &self,
        discipline: Discipline,
        metric: &str,
        cohort: Option<Cohort>,
    ) -> Result<ReferencePopulation, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT value FROM reference_samples
                 WHERE discipline = ?1 AND metric = ?2 AND (?3 IS NULL OR cohort = ?3)
                 UNION ALL
                 SELECT value FROM cohort_contributions
                 WHERE discipline = ?1 AND metric = ?2 AND (?3 IS NULL OR cohort = ?3)",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![discipline.code(), metric, cohort.map(|c| c.as_str())],
                |row| row.get::<_, f64>(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?);
        }

        Ok(ReferencePopulation::new(samples))
    }

    /// Import seeded samples. Returns the number of rows written.
    pub fn insert_reference_seed(&self, seed: &ReferenceSeed) -> Result<usize, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO reference_samples (discipline, metric, cohort, value, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut written = 0;
        for value in seed.values.iter().filter(|v| v.is_finite()) {
            stmt.execute(params![
                seed.discipline.code(),
                seed.metric,
                seed.cohort.as_str(),
                value,
                seed.source,
            ])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            written += 1;
        }

        Ok(written)
    }

    // ========== Contributions ==========

    /// Recompute an athlete's contribution rows for one discipline.
    ///
    /// The eligibility check and the upsert run under one savepoint; any
    /// failure rolls both back so the athlete contributes nothing rather
    /// than a partial set.
    pub fn refresh_contribution(
        &self,
        athlete_id: &Uuid,
        discipline: Discipline,
        cohort: Cohort,
    ) -> Result<ContributionOutcome, DatabaseError> {
        with_savepoint(self.conn, "contribution", || {
            self.upsert_contribution(athlete_id, discipline, cohort)
        })
    }

    fn upsert_contribution(
        &self,
        athlete_id: &Uuid,
        discipline: Discipline,
        cohort: Cohort,
    ) -> Result<ContributionOutcome, DatabaseError> {
        let tests = TestStore::new(self.conn);

        let distinct_tests = tests.count_distinct_tests(discipline, athlete_id)?;
        if distinct_tests < MIN_TESTS_TO_CONTRIBUTE {
            return Ok(ContributionOutcome::Ineligible { distinct_tests });
        }

        let Some(latest) = tests.latest_test(discipline, athlete_id)? else {
            return Ok(ContributionOutcome::Ineligible { distinct_tests: 0 });
        };

        let now = format_timestamp(&Utc::now());
        let mut written = 0;
        for &metric in discipline.tracked_metrics() {
            let Some(value) = latest.metrics.get(metric) else {
                continue;
            };

            self.conn
                .execute(
                    "INSERT INTO cohort_contributions
                     (athlete_id, discipline, metric, cohort, provider_test_id, value, test_date, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(athlete_id, discipline, metric) DO UPDATE SET
                        cohort = excluded.cohort,
                        provider_test_id = excluded.provider_test_id,
                        value = excluded.value,
                        test_date = excluded.test_date,
                        updated_at = excluded.updated_at",
                    params![
                        athlete_id.to_string(),
                        discipline.code(),
                        metric,
                        cohort.as_str(),
                        latest.provider_test_id,
                        value,
                        format_timestamp(&latest.recorded_at),
                        now,
                    ],
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            written += 1;
        }

        Ok(ContributionOutcome::Contributed(written))
    }

    /// Move every contribution row of an athlete to a new cohort.
    pub fn move_contributions(&self, athlete_id: &Uuid, cohort: Cohort) -> Result<usize, DatabaseError> {
        self.conn
            .execute(
                "UPDATE cohort_contributions SET cohort = ?2, updated_at = ?3 WHERE athlete_id = ?1",
                params![
                    athlete_id.to_string(),
                    cohort.as_str(),
                    format_timestamp(&Utc::now())
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Contribution rows of one athlete.
    pub fn contributions_for(
        &self,
        athlete_id: &Uuid,
    ) -> Result<Vec<CohortContribution>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT discipline, metric, cohort, provider_test_id, value, test_date, updated_at
                 FROM cohort_contributions WHERE athlete_id = ?1 ORDER BY discipline, metric",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![athlete_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut contributions = Vec::new();
        for row in rows {
            let (discipline, metric, cohort, provider_test_id, value, test_date, updated_at) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            contributions.push(CohortContribution {
                athlete_id: *athlete_id,
                discipline: parse_discipline(&discipline)?,
                metric,
                cohort: parse_cohort(&cohort)?,
                provider_test_id,
                value,
                test_date: parse_timestamp(&test_date)?,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }

        Ok(contributions)
    }

    // ========== Percentile history ==========

    /// Append one history row. Rows are never updated.
    pub fn append_history(&self, entry: &PercentileHistoryEntry) -> Result<i64, DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO percentile_history (athlete_id, discipline, provider_test_id, metric,
                 value, cohort, percentile_cohort, percentile_overall, test_date, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.athlete_id.to_string(),
                    entry.discipline.code(),
                    entry.provider_test_id,
                    entry.metric,
                    entry.value,
                    entry.cohort.as_str(),
                    entry.percentile_cohort,
                    entry.percentile_overall,
                    format_timestamp(&entry.test_date),
                    format_timestamp(&entry.computed_at),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// History rows of an athlete in write order, optionally for one
    /// discipline.
    pub fn history_for(
        &self,
        athlete_id: &Uuid,
        discipline: Option<Discipline>,
    ) -> Result<Vec<PercentileHistoryEntry>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT athlete_id, discipline, provider_test_id, metric, value, cohort,
                 percentile_cohort, percentile_overall, test_date, computed_at
                 FROM percentile_history
                 WHERE athlete_id = ?1 AND (?2 IS NULL OR discipline = ?2)
                 ORDER BY id ASC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![athlete_id.to_string(), discipline.map(|d| d.code())],
                |row| {
                    Ok(HistoryRow {
                        athlete_id: row.get(0)?,
                        discipline: row.get(1)?,
                        provider_test_id: row.get(2)?,
                        metric: row.get(3)?,
                        value: row.get(4)?,
                        cohort: row.get(5)?,
                        percentile_cohort: row.get(6)?,
                        percentile_overall: row.get(7)?,
                        test_date: row.get(8)?,
                        computed_at: row.get(9)?,
                    })
                },
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            entries.push(row.into_entry()?);
        }

        Ok(entries)
    }

    /// Authoritative history rows: the newest per (discipline, test, metric).
    pub fn latest_entries(
        &self,
        athlete_id: &Uuid,
    ) -> Result<Vec<PercentileHistoryEntry>, DatabaseError> {
        let history = self.history_for(athlete_id, None)?;
        let mut latest: Vec<PercentileHistoryEntry> =
            authoritative_entries(&history).into_iter().cloned().collect();
        latest.sort_by(|a, b| {
            a.test_date
                .cmp(&b.test_date)
                .then_with(|| a.discipline.cmp(&b.discipline))
                .then_with(|| a.metric.cmp(&b.metric))
        });

        Ok(latest)
    }

    /// Force profile composite per test date, computed from history on read.
    pub fn force_profiles_by_date(
        &self,
        athlete_id: &Uuid,
    ) -> Result<Vec<DatedComposite>, DatabaseError> {
        let history = self.history_for(athlete_id, None)?;
        Ok(force_profiles_by_date(&history))
    }

    /// Number of history rows for an athlete.
    pub fn count_history(&self, athlete_id: &Uuid) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM percentile_history WHERE athlete_id = ?1",
                params![athlete_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }

    // ========== Composite history ==========

    /// Append one composite snapshot.
    pub fn append_composite(
        &self,
        athlete_id: &Uuid,
        cohort: Cohort,
        score: &CompositeScore,
        computed_at: &DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let disciplines = serde_json::to_string(&score.disciplines)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO composite_history (athlete_id, kind, cohort, score_cohort,
                 score_overall, disciplines, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    athlete_id.to_string(),
                    score.kind.as_str(),
                    cohort.as_str(),
                    score.cohort,
                    score.overall,
                    disciplines,
                    format_timestamp(computed_at),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Composite snapshots of an athlete, oldest first.
    pub fn composite_history(
        &self,
        athlete_id: &Uuid,
        kind: CompositeKind,
    ) -> Result<Vec<CompositeRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT kind, cohort, score_cohort, score_overall, disciplines, computed_at
                 FROM composite_history WHERE athlete_id = ?1 AND kind = ?2 ORDER BY id ASC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![athlete_id.to_string(), kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, cohort, score_cohort, score_overall, disciplines, computed_at) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            let kind = CompositeKind::from_key(&kind).ok_or_else(|| {
                DatabaseError::DeserializationError(format!("Unknown composite kind: {}", kind))
            })?;
            let disciplines: Vec<Discipline> = serde_json::from_str(&disciplines).map_err(|e| {
                DatabaseError::DeserializationError(format!("Invalid disciplines JSON: {}", e))
            })?;

            records.push(CompositeRecord {
                kind,
                cohort: parse_cohort(&cohort)?,
                score_cohort,
                score_overall,
                disciplines,
                computed_at: parse_timestamp(&computed_at)?,
            });
        }

        Ok(records)
    }
}

fn parse_discipline(code: &str) -> Result<Discipline, DatabaseError> {
    Discipline::from_code(code)
        .ok_or_else(|| DatabaseError::DeserializationError(format!("Unknown discipline: {}", code)))
}

fn parse_cohort(key: &str) -> Result<Cohort, DatabaseError> {
    key.parse::<Cohort>()
        .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

/// Intermediate struct for reading percentile history rows from database.
struct HistoryRow {
    athlete_id: String,
    discipline: String,
    provider_test_id: String,
    metric: String,
    value: f64,
    cohort: String,
    percentile_cohort: Option<f64>,
    percentile_overall: Option<f64>,
    test_date: String,
    computed_at: String,
}

impl HistoryRow {
    fn into_entry(self) -> Result<PercentileHistoryEntry, DatabaseError> {
        let athlete_id = Uuid::parse_str(&self.athlete_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid athlete UUID: {}", e))
        })?;

        Ok(PercentileHistoryEntry {
            athlete_id,
            discipline: parse_discipline(&self.discipline)?,
            provider_test_id: self.provider_test_id,
            metric: self.metric,
            value: self.value,
            cohort: parse_cohort(&self.cohort)?,
            percentile_cohort: self.percentile_cohort,
            percentile_overall: self.percentile_overall,
            test_date: parse_timestamp(&self.test_date)?,
            computed_at: parse_timestamp(&self.computed_at)?,
        })
    }
}
