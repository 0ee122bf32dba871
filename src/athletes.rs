//! Athlete profile and play-level cohort.
//!
//! The profile carries the denormalized sync fields (last sync, bodyweight,
//! composites) that the sync pipeline overwrites at the end of every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Play-level classification used to select a percentile reference population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Youth,
    HighSchool,
    College,
    Pro,
}

impl Cohort {
    /// All cohorts, youngest first.
    pub const ALL: [Cohort; 4] = [
        Cohort::Youth,
        Cohort::HighSchool,
        Cohort::College,
        Cohort::Pro,
    ];

    /// Storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Youth => "youth",
            Cohort::HighSchool => "high_school",
            Cohort::College => "college",
            Cohort::Pro => "pro",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Cohort::Youth => "Youth",
            Cohort::HighSchool => "High School",
            Cohort::College => "College",
            Cohort::Pro => "Pro",
        }
    }
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Error returned when a play level string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown play level: {0}")]
pub struct UnknownCohort(pub String);

impl FromStr for Cohort {
    type Err = UnknownCohort;

    /// Accepts the storage key, the display name, or the display name
    /// without spaces, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "youth" => Ok(Cohort::Youth),
            "highschool" | "hs" => Ok(Cohort::HighSchool),
            "college" => Ok(Cohort::College),
            "pro" | "professional" => Ok(Cohort::Pro),
            _ => Err(UnknownCohort(s.to_string())),
        }
    }
}

/// Athlete record as seen by the sync pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteProfile {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Play level; required before any percentile math
    pub cohort: Option<Cohort>,
    /// Provider profile id once linked
    pub external_id: Option<String>,
    /// Provider sync id awaiting resolution into `external_id`
    pub pending_link_id: Option<String>,
    /// Last successful sync
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Most recent CMJ bodyweight in pounds, rounded to 0.1
    pub bodyweight_lb: Option<f64>,
    /// Rolling per-sync composite
    pub composite_score: Option<f64>,
    /// Four-discipline force profile composite (CMJ excluded)
    pub force_profile_composite: Option<f64>,
    /// Record creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl AthleteProfile {
    /// Create a new, unlinked athlete.
    pub fn new(name: impl Into<String>, cohort: Option<Cohort>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cohort,
            external_id: None,
            pending_link_id: None,
            last_synced_at: None,
            bodyweight_lb: None,
            composite_score: None,
            force_profile_composite: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a resolved provider profile id.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Attach a provider sync id that still needs resolving.
    pub fn with_pending_link(mut self, pending: impl Into<String>) -> Self {
        self.pending_link_id = Some(pending.into());
        self
    }

    /// Whether the athlete can be synced without identity resolution.
    pub fn is_linked(&self) -> bool {
        self.external_id.is_some()
    }
}
