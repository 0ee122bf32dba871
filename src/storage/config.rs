//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Every section
//! and field has a default so a missing or partial file still loads.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `provider.client_id`.
pub const CLIENT_ID_ENV: &str = "FORCESYNC_CLIENT_ID";

/// Environment variable overriding `provider.client_secret`.
pub const CLIENT_SECRET_ENV: &str = "FORCESYNC_CLIENT_SECRET";

/// Upper bound for any day-based window (ten years).
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// SQLite database file; defaults to `<data_dir>/forcesync.db`
    pub database_path: Option<PathBuf>,
    /// Force-plate provider settings
    pub provider: ProviderConfig,
    /// Sync pipeline settings
    pub sync: SyncSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            database_path: None,
            provider: ProviderConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl AppConfig {
    /// Resolved database location.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("forcesync.db"))
    }

    /// Apply credential overrides from a variable lookup.
    ///
    /// Values found through `lookup` win over the file; blank values are
    /// ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(client_id) = non_blank(CLIENT_ID_ENV) {
            self.provider.client_id = Some(client_id);
        }
        if let Some(client_secret) = non_blank(CLIENT_SECRET_ENV) {
            self.provider.client_secret = Some(client_secret);
        }
    }
}

/// Force-plate provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Test data API base URL
    pub base_url: String,
    /// OAuth2 token endpoint
    pub auth_url: String,
    /// Profile service base URL (identity resolution)
    pub profile_url: String,
    /// OAuth2 client id
    pub client_id: Option<String>,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Provider tenant
    pub tenant_id: Option<String>,
    /// OAuth2 scope
    pub scope: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient failures
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub retry_base_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://prd-use-api-extforcedecks.valdperformance.com".to_string(),
            auth_url: "https://security.valdperformance.com/connect/token".to_string(),
            profile_url: "https://prd-use-api-extprofiles.valdperformance.com".to_string(),
            client_id: None,
            client_secret: None,
            tenant_id: None,
            scope: None,
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

impl ProviderConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

/// Sync pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Fixed lookback for the changed-tests query.
    ///
    /// The provider's change timestamp is the analysis time, not the record
    /// time. A high-watermark on the last sync would miss tests recorded
    /// earlier but analyzed later.
    pub lookback_days: i64,
    /// Window for the rolling composite, ending at the newest test
    pub rolling_window_days: i64,
    /// Athletes synced in parallel by `sync-all`
    pub max_concurrent_athletes: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lookback_days: 180,
            rolling_window_days: 90,
            max_concurrent_athletes: 4,
        }
    }
}

impl SyncSettings {
    /// Reject windows outside `1..=MAX_WINDOW_DAYS`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, days) in [
            ("sync.lookback_days", self.lookback_days),
            ("sync.rolling_window_days", self.rolling_window_days),
        ] {
            if !(1..=MAX_WINDOW_DAYS).contains(&days) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} = {} (expected 1..={})",
                    name, days, MAX_WINDOW_DAYS
                )));
            }
        }
        Ok(())
    }

    /// Lookback clamped into the valid range.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days.clamp(1, MAX_WINDOW_DAYS))
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "forcesync", "ForceSync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from `path`, falling back to defaults
/// when the file does not exist. Environment overrides are applied and the
/// sync windows are range-checked.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str::<AppConfig>(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        AppConfig::default()
    };

    config.sync.validate()?;
    config.data_dir = get_data_dir();
    config.apply_overrides(|key| std::env::var(key).ok());

    Ok(config)
}

/// Write `config` as TOML to `path`, creating parent directories.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Write a default configuration to `path`.
///
/// An existing file is left alone unless `force` is set. Returns whether the
/// file was written.
pub fn init_config(path: &Path, force: bool) -> Result<bool, ConfigError> {
    if path.exists() && !force {
        tracing::info!("Config already exists at {}", path.display());
        return Ok(false);
    }

    save_config(&AppConfig::default(), path)?;
    tracing::info!("Wrote default config to {}", path.display());
    Ok(true)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}
