//! Composite aggregator.
//!
//! Both passes read persisted percentile history only, never the in-flight
//! batch, so they can be rerun at any time with the same result.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::athletes::Cohort;
use crate::metrics::composite::{force_profile_composite, rolling_composite, CompositeScore};
use crate::storage::{AthleteStore, DatabaseError, PercentileStore};

/// Recomputes and stores the athlete's composite scores.
#[derive(Debug, Clone, Copy)]
pub struct CompositeAggregator {
    rolling_window_days: i64,
}

impl CompositeAggregator {
    pub fn new(rolling_window_days: i64) -> Self {
        Self {
            rolling_window_days,
        }
    }

    /// Recompute the rolling composite and overwrite it on the athlete.
    pub fn update_rolling_composite(
        &self,
        conn: &Connection,
        athlete_id: &Uuid,
        cohort: Cohort,
    ) -> Result<Option<CompositeScore>, DatabaseError> {
        let history = PercentileStore::new(conn).history_for(athlete_id, None)?;
        let score = rolling_composite(&history, self.rolling_window_days);

        AthleteStore::new(conn).set_composite_score(athlete_id, score.as_ref().and_then(|s| s.headline()))?;
        self.record(conn, athlete_id, cohort, score.as_ref())?;

        Ok(score)
    }

    /// Recompute the force profile composite (CMJ excluded) and overwrite it
    /// on the athlete. A partial set of disciplines still yields a score.
    pub fn update_force_profile_composite(
        &self,
        conn: &Connection,
        athlete_id: &Uuid,
        cohort: Cohort,
    ) -> Result<Option<CompositeScore>, DatabaseError> {
        let history = PercentileStore::new(conn).history_for(athlete_id, None)?;
        let score = force_profile_composite(&history);

        AthleteStore::new(conn)
            .set_force_profile_composite(athlete_id, score.as_ref().and_then(|s| s.headline()))?;
        self.record(conn, athlete_id, cohort, score.as_ref())?;

        Ok(score)
    }

    fn record(
        &self,
        conn: &Connection,
        athlete_id: &Uuid,
        cohort: Cohort,
        score: Option<&CompositeScore>,
    ) -> Result<(), DatabaseError> {
        match score {
            Some(score) => {
                tracing::info!(
                    "Athlete {} {} composite: cohort {:?}, overall {:?} over {} disciplines",
                    athlete_id,
                    score.kind.as_str(),
                    score.cohort,
                    score.overall,
                    score.disciplines.len()
                );
                PercentileStore::new(conn).append_composite(athlete_id, cohort, score, &Utc::now())
            }
            None => {
                tracing::debug!("Athlete {} has no data for a composite", athlete_id);
                Ok(())
            }
        }
    }
}
