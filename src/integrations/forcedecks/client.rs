//! HTTP client for the force-plate provider.
//!
//! Every call carries a bounded timeout. Transient failures are retried with
//! exponential backoff; an auth failure forces one re-authentication.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::auth::TokenManager;
use super::{ChangedTests, ExternalTestRef, ProviderError, TestProvider, TrialRecord, UnsupportedTest};
use crate::metrics::disciplines::Discipline;
use crate::storage::config::ProviderConfig;

/// One page of the changed-tests listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedTestsPage {
    #[serde(default)]
    tests: Vec<ChangedTestItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Listing entry
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedTestItem {
    test_id: String,
    test_type: String,
    test_date: DateTime<Utc>,
    #[serde(default)]
    profile_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileLookup {
    #[serde(default)]
    profiles: Vec<ProfileItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileItem {
    profile_id: String,
}

/// How a 404 from an endpoint is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    /// Nothing exists yet for the request
    Empty,
    /// The request named something the provider does not know
    Fail,
}

/// Pagination state: the cursor for the next request and every cursor
/// handed out so far.
#[derive(Debug, Default)]
struct PageCursor {
    next: Option<String>,
    seen: HashSet<String>,
}

/// Provider API client.
pub struct ForceDecksClient {
    http: reqwest::Client,
    tokens: TokenManager,
    config: ProviderConfig,
}

impl ForceDecksClient {
    /// Create a client from provider settings.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        let tokens = TokenManager::new(http.clone(), config)?;

        Ok(Self {
            http,
            tokens,
            config: config.clone(),
        })
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    fn with_tenant(&self, mut query: Vec<(&'static str, String)>, key: &'static str) -> Vec<(&'static str, String)> {
        if let Some(tenant) = self.config.tenant_id.as_ref() {
            query.push((key, tenant.clone()));
        }
        query
    }

    /// GET a JSON document, applying the retry policy.
    ///
    /// `Ok(None)` means the provider had nothing for this request: a 204,
    /// an empty body, or a 404 when `on_missing` is [`OnMissing::Empty`].
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&'static str, String)],
        on_missing: OnMissing,
    ) -> Result<Option<T>, ProviderError> {
        let mut transient_attempts = 0u32;
        let mut reauthenticated = false;

        loop {
            match self.get_once(url, query, on_missing).await {
                Ok(value) => return Ok(value),
                Err(ProviderError::Auth(reason)) if !reauthenticated => {
                    tracing::warn!("Provider rejected credentials ({}), re-authenticating", reason);
                    self.tokens.invalidate().await;
                    reauthenticated = true;
                }
                Err(e) if e.is_transient() && transient_attempts < self.config.max_retries => {
                    let delay = self.config.retry_delay(transient_attempts);
                    transient_attempts += 1;
                    tracing::warn!(
                        "{} (retry {}/{} in {:?})",
                        e,
                        transient_attempts,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&'static str, String)],
        on_missing: OnMissing,
    ) -> Result<Option<T>, ProviderError> {
        let token = self.tokens.token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    ProviderError::NotConfigured(e.to_string())
                } else if e.is_connect() || e.is_timeout() {
                    ProviderError::Transient(format!("{} unreachable: {}", url, e))
                } else {
                    ProviderError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => return Err(ProviderError::Auth(format!("{} returned {}", url, status))),
            204 => return Ok(None),
            404 if on_missing == OnMissing::Empty => return Ok(None),
            404 => return Err(ProviderError::Malformed(format!("{} returned {}", url, status))),
            429 => return Err(ProviderError::Transient(format!("{} returned {}", url, status))),
            _ if status.is_server_error() => {
                return Err(ProviderError::Transient(format!("{} returned {}", url, status)))
            }
            _ if !status.is_success() => {
                return Err(ProviderError::Malformed(format!("{} returned {}", url, status)))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("reading {}: {}", url, e)))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", url, e)))
    }

    async fn fetch_page(
        &self,
        profile_id: &str,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<ChangedTestsPage, ProviderError> {
        let mut query = vec![
            ("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("profileId", profile_id.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let query = self.with_tenant(query, "tenantId");

        let url = Self::endpoint(&self.config.base_url, "changed-tests");
        let page = self
            .get_json::<ChangedTestsPage>(&url, &query, OnMissing::Fail)
            .await?;

        Ok(page.unwrap_or(ChangedTestsPage {
            tests: Vec::new(),
            next_cursor: None,
        }))
    }
}

impl TestProvider for ForceDecksClient {
    async fn fetch_changed_tests(
        &self,
        athlete_external_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ChangedTests, ProviderError> {
        // State is None once drained. A cursor seen before means the
        // provider is cycling; stop rather than page forever.
        let start = Some(PageCursor::default());
        let pages = futures::stream::try_unfold(start, move |state| async move {
            let Some(mut state) = state else {
                return Ok(None);
            };
            let page = self
                .fetch_page(athlete_external_id, since, state.next.as_deref())
                .await?;

            let next = page
                .next_cursor
                .filter(|cursor| !cursor.is_empty())
                .and_then(|cursor| {
                    if state.seen.insert(cursor.clone()) {
                        state.next = Some(cursor);
                        Some(state)
                    } else {
                        tracing::warn!("Provider repeated cursor {}, stopping pagination", cursor);
                        None
                    }
                });
            Ok::<_, ProviderError>(Some((page.tests, next)))
        });
        futures::pin_mut!(pages);

        let mut changed = ChangedTests::default();
        while let Some(items) = pages.try_next().await? {
            for item in items {
                match Discipline::from_code(&item.test_type) {
                    Some(discipline) => changed.tests.push(ExternalTestRef {
                        provider_test_id: item.test_id,
                        discipline,
                        recorded_at: item.test_date,
                        athlete_linkage: item
                            .profile_id
                            .unwrap_or_else(|| athlete_external_id.to_string()),
                    }),
                    None => {
                        tracing::warn!(
                            "Skipping test {} with unknown type {}",
                            item.test_id,
                            item.test_type
                        );
                        changed.unsupported.push(UnsupportedTest {
                            provider_test_id: item.test_id,
                            test_type: item.test_type,
                        });
                    }
                }
            }
        }

        tracing::debug!(
            "Provider listed {} tests for profile {} ({} unsupported)",
            changed.total_found(),
            athlete_external_id,
            changed.unsupported.len()
        );

        Ok(changed)
    }

    async fn fetch_trials(&self, provider_test_id: &str) -> Result<Vec<TrialRecord>, ProviderError> {
        let query = self.with_tenant(vec![("testId", provider_test_id.to_string())], "tenantId");
        let url = Self::endpoint(&self.config.base_url, "trials");

        Ok(self
            .get_json::<Vec<TrialRecord>>(&url, &query, OnMissing::Empty)
            .await?
            .unwrap_or_default())
    }

    async fn resolve_profile_id(&self, pending_link_id: &str) -> Result<Option<String>, ProviderError> {
        let query = self.with_tenant(vec![("SyncId", pending_link_id.to_string())], "TenantId");
        let url = Self::endpoint(&self.config.profile_url, "profiles");

        let lookup = self
            .get_json::<ProfileLookup>(&url, &query, OnMissing::Empty)
            .await?;
        Ok(lookup.and_then(|l| l.profiles.into_iter().next().map(|p| p.profile_id)))
    }
}
