//! Athlete record persistence.
//!
//! Works on any connection, including an open transaction, so the sync
//! pipeline can fold athlete updates into the same unit of work as the
//! history rows they derive from.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::athletes::{AthleteProfile, Cohort};
use crate::storage::database::{format_timestamp, parse_timestamp, DatabaseError};

const ATHLETE_COLUMNS: &str = "id, name, cohort, external_id, pending_link_id, last_synced_at,
     bodyweight_lb, composite_score, force_profile_composite, created_at, updated_at";

/// Athlete store over a borrowed connection.
pub struct AthleteStore<'a> {
    conn: &'a Connection,
}

impl<'a> AthleteStore<'a> {
    /// Create a new athlete store with the given connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new athlete.
    pub fn insert_athlete(&self, athlete: &AthleteProfile) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO athletes (id, name, cohort, external_id, pending_link_id, last_synced_at,
                 bodyweight_lb, composite_score, force_profile_composite, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    athlete.id.to_string(),
                    athlete.name,
                    athlete.cohort.map(|c| c.as_str()),
                    athlete.external_id,
                    athlete.pending_link_id,
                    athlete.last_synced_at.as_ref().map(format_timestamp),
                    athlete.bodyweight_lb,
                    athlete.composite_score,
                    athlete.force_profile_composite,
                    format_timestamp(&athlete.created_at),
                    format_timestamp(&athlete.updated_at),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Get an athlete by ID.
    pub fn get_athlete(&self, id: &Uuid) -> Result<Option<AthleteProfile>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM athletes WHERE id = ?1", ATHLETE_COLUMNS),
                params![id.to_string()],
                AthleteRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(AthleteRow::into_profile).transpose()
    }

    /// List athletes that can be synced: linked, or awaiting link resolution.
    pub fn list_syncable(&self) -> Result<Vec<AthleteProfile>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM athletes
                 WHERE external_id IS NOT NULL OR pending_link_id IS NOT NULL
                 ORDER BY created_at ASC",
                ATHLETE_COLUMNS
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], AthleteRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut athletes = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            athletes.push(row.into_profile()?);
        }

        Ok(athletes)
    }

    /// Persist a resolved provider profile id and clear the pending link.
    pub fn set_external_id(&self, id: &Uuid, external_id: &str) -> Result<(), DatabaseError> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE athletes SET external_id = ?2, pending_link_id = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), external_id, format_timestamp(&Utc::now())],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(DatabaseError::NotFound(format!("Athlete {}", id)));
        }

        Ok(())
    }

    /// Change the athlete's play level.
    pub fn set_cohort(&self, id: &Uuid, cohort: Cohort) -> Result<(), DatabaseError> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE athletes SET cohort = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), cohort.as_str(), format_timestamp(&Utc::now())],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(DatabaseError::NotFound(format!("Athlete {}", id)));
        }

        Ok(())
    }

    /// Overwrite the displayed bodyweight.
    pub fn set_bodyweight(&self, id: &Uuid, bodyweight_lb: f64) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE athletes SET bodyweight_lb = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), bodyweight_lb, format_timestamp(&Utc::now())],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Overwrite the rolling composite. `None` clears it.
    pub fn set_composite_score(&self, id: &Uuid, score: Option<f64>) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE athletes SET composite_score = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), score, format_timestamp(&Utc::now())],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Overwrite the force profile composite. `None` clears it.
    pub fn set_force_profile_composite(
        &self,
        id: &Uuid,
        score: Option<f64>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE athletes SET force_profile_composite = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), score, format_timestamp(&Utc::now())],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Record the end of a sync run.
    pub fn mark_synced(&self, id: &Uuid, at: &DateTime<Utc>) -> Result<(), DatabaseError> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE athletes SET last_synced_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), format_timestamp(at)],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(DatabaseError::NotFound(format!("Athlete {}", id)));
        }

        Ok(())
    }
}

/// Intermediate struct for reading athlete rows from database.
struct AthleteRow {
    id: String,
    name: String,
    cohort: Option<String>,
    external_id: Option<String>,
    pending_link_id: Option<String>,
    last_synced_at: Option<String>,
    bodyweight_lb: Option<f64>,
    composite_score: Option<f64>,
    force_profile_composite: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl AthleteRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            cohort: row.get(2)?,
            external_id: row.get(3)?,
            pending_link_id: row.get(4)?,
            last_synced_at: row.get(5)?,
            bodyweight_lb: row.get(6)?,
            composite_score: row.get(7)?,
            force_profile_composite: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_profile(self) -> Result<AthleteProfile, DatabaseError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| DatabaseError::DeserializationError(format!("Invalid UUID: {}", e)))?;

        let cohort = self
            .cohort
            .map(|s| s.parse::<Cohort>())
            .transpose()
            .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;

        let last_synced_at = self
            .last_synced_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(AthleteProfile {
            id,
            name: self.name,
            cohort,
            external_id: self.external_id,
            pending_link_id: self.pending_link_id,
            last_synced_at,
            bodyweight_lb: self.bodyweight_lb,
            composite_score: self.composite_score,
            force_profile_composite: self.force_profile_composite,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
