//! Force-test sync pipeline.
//!
//! Orchestrator -> provider (changed tests) -> per test: store, percentile ->
//! after all tests: rolling and force profile composites.

pub mod aggregator;
pub mod orchestrator;
pub mod percentiles;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::athletes::Cohort;
use crate::integrations::forcedecks::ProviderError;
use crate::storage::DatabaseError;

pub use aggregator::CompositeAggregator;
pub use orchestrator::SyncOrchestrator;
pub use percentiles::PercentileEngine;

/// Run-level sync errors. Per-test failures never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Athlete not found: {0}")]
    AthleteNotFound(Uuid),

    #[error("Athlete {0} has no provider link")]
    NoExternalLink(Uuid),

    #[error("Athlete {0} has no play level set")]
    CohortMissing(Uuid),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// HTTP-style status of a failed run, for the calling web layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotFound,
    PreconditionFailed,
    BadGateway,
    Internal,
}

impl SyncStatus {
    pub fn code(&self) -> u16 {
        match self {
            SyncStatus::NotFound => 404,
            SyncStatus::PreconditionFailed => 412,
            SyncStatus::BadGateway => 502,
            SyncStatus::Internal => 500,
        }
    }
}

impl SyncError {
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncError::AthleteNotFound(_) | SyncError::NoExternalLink(_) => SyncStatus::NotFound,
            SyncError::CohortMissing(_) => SyncStatus::PreconditionFailed,
            SyncError::Provider(_) => SyncStatus::BadGateway,
            SyncError::Storage(_) => SyncStatus::Internal,
        }
    }
}

/// Phase of one athlete's sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ResolvingIdentity,
    Fetching,
    ProcessingTests { index: usize, total: usize },
    Aggregating,
    Done,
    PartialFailure,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::PartialFailure)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::ResolvingIdentity => write!(f, "resolving identity"),
            RunState::Fetching => write!(f, "fetching"),
            RunState::ProcessingTests { index, total } => {
                write!(f, "processing test {}/{}", index, total)
            }
            RunState::Aggregating => write!(f, "aggregating"),
            RunState::Done => write!(f, "done"),
            RunState::PartialFailure => write!(f, "partial failure"),
        }
    }
}

/// Outcome of one athlete's sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// The run completed; per-test errors may still be present
    pub success: bool,
    /// Tests newly stored by this run
    pub tests_synced: usize,
    /// Tests the provider listed, including unsupported ones
    pub total_tests_found: usize,
    pub sync_timestamp: DateTime<Utc>,
    /// Human-readable per-test failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl SyncResult {
    /// Terminal state the run ended in.
    pub fn state(&self) -> RunState {
        match &self.errors {
            Some(errors) if !errors.is_empty() => RunState::PartialFailure,
            _ => RunState::Done,
        }
    }
}

/// One athlete that failed inside a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub athlete_id: Uuid,
    pub reason: String,
}

/// Outcome of syncing every linked athlete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub athletes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub tests_synced: usize,
    /// Athletes whose run completed with per-test errors
    pub partial: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failures: Vec<BatchFailure>,
}

/// Outcome of a cohort reclassification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeSummary {
    pub athlete_id: Uuid,
    pub cohort: Cohort,
    /// Stored tests re-ranked
    pub tests_recomputed: usize,
    /// Percentile history rows appended
    pub history_rows: usize,
    /// Contribution rows moved to the new cohort
    pub contributions_moved: usize,
    pub composite_score: Option<f64>,
    pub force_profile_composite: Option<f64>,
}
