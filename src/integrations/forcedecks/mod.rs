//! Force-plate provider integration.
//!
//! Fetches changed tests and per-test trial detail from the lab-equipment
//! provider. Derived metrics arrive already computed; this module only moves
//! them across the wire.

pub mod auth;
pub mod client;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::disciplines::Discipline;

pub use auth::{AccessToken, TokenManager};
pub use client::ForceDecksClient;

/// Provider call errors.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Expired or invalid credentials. Retried once after re-authentication.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 5xx or network failure. Retried with backoff.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Unexpected payload shape. Never retried.
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// Credentials or endpoints missing from configuration.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a bounded backoff retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Identifies one provider-side test. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTestRef {
    /// Provider test id
    pub provider_test_id: String,
    /// Test discipline
    pub discipline: Discipline,
    /// When the test was recorded
    pub recorded_at: DateTime<Utc>,
    /// Provider profile the test belongs to
    pub athlete_linkage: String,
}

/// A listed test whose type code is outside the known disciplines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsupportedTest {
    pub provider_test_id: String,
    pub test_type: String,
}

/// Result of draining the changed-tests listing.
#[derive(Debug, Clone, Default)]
pub struct ChangedTests {
    /// Tests with a known discipline, in listing order
    pub tests: Vec<ExternalTestRef>,
    /// Tests skipped because their type code is unknown
    pub unsupported: Vec<UnsupportedTest>,
}

impl ChangedTests {
    /// Total tests the provider reported, known or not.
    pub fn total_found(&self) -> usize {
        self.tests.len() + self.unsupported.len()
    }
}

/// One raw trial measurement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    /// When the trial was captured
    #[serde(rename = "recordedUTC")]
    pub recorded_at: DateTime<Utc>,
    /// Capture timezone, informational only
    #[serde(default)]
    pub recorded_timezone: Option<String>,
    /// Scalar results computed by the provider
    #[serde(default)]
    pub results: Vec<TrialResult>,
}

/// One provider-computed scalar inside a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Raw value; non-numeric values are ignored
    #[serde(default)]
    pub value: serde_json::Value,
    /// Limb the value applies to ("Trial" for whole-body values)
    #[serde(default)]
    pub limb: Option<String>,
    /// Result definition
    pub definition: ResultDefinition,
}

/// Result code and unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDefinition {
    /// Result code, e.g. `PEAK_TAKEOFF_POWER`
    pub result: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl TrialResult {
    /// Build a whole-trial numeric result.
    pub fn trial(code: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            value: serde_json::json!(value),
            limb: Some("Trial".to_string()),
            definition: ResultDefinition {
                result: code.into(),
                unit: Some(unit.into()),
            },
        }
    }

    /// Result code.
    pub fn code(&self) -> &str {
        &self.definition.result
    }

    /// Numeric value, if the provider sent a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64().filter(|v| v.is_finite())
    }

    /// Whether the value describes the whole trial rather than one limb.
    pub fn is_whole_trial(&self) -> bool {
        match self.limb.as_deref() {
            None => true,
            Some(limb) => limb.eq_ignore_ascii_case("trial"),
        }
    }
}

/// Seam between the sync pipeline and the provider.
pub trait TestProvider: Send + Sync {
    /// List tests changed since `since` for one provider profile, draining
    /// every page.
    fn fetch_changed_tests(
        &self,
        athlete_external_id: &str,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ChangedTests, ProviderError>> + Send;

    /// Fetch trial detail for one test.
    fn fetch_trials(
        &self,
        provider_test_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TrialRecord>, ProviderError>> + Send;

    /// Resolve a pending sync id into a provider profile id.
    ///
    /// `Ok(None)` means the provider has not created the profile yet.
    fn resolve_profile_id(
        &self,
        pending_link_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, ProviderError>> + Send;
}
