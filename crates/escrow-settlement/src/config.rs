//! # Settlement Configuration
//!
//! All settings come from environment variables with defaults. Collaborator
//! endpoints are optional as a group: with none set the service runs against
//! the in-memory directory.

use std::time::Duration;

use escrow_engine::InitialReleasePolicy;
use url::Url;

/// Commit-loop and policy settings for [`crate::SettlementService`].
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Commit attempts before `Congested` is returned.
    pub max_commit_attempts: u32,
    /// Base delay between attempts; doubles each retry.
    pub base_backoff: Duration,
    /// Per-commit timeout. Expiry means the outcome is unknown.
    pub commit_timeout: Duration,
    /// Extra attempts for ledger reads that fail as unavailable.
    pub read_retries: u32,
    pub initial_release: InitialReleasePolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 4,
            base_backoff: Duration::from_millis(50),
            commit_timeout: Duration::from_secs(5),
            read_retries: 3,
            initial_release: InitialReleasePolicy::OnThreshold,
        }
    }
}

impl SettlementConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `ESCROW_COMMIT_ATTEMPTS` (default: 4, minimum 1)
    /// - `ESCROW_COMMIT_BACKOFF_MS` (default: 50)
    /// - `ESCROW_COMMIT_TIMEOUT_MS` (default: 5000)
    /// - `ESCROW_READ_RETRIES` (default: 3)
    /// - `ESCROW_INITIAL_RELEASE` (`on_threshold` | `manual`, default: `on_threshold`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let initial_release = match std::env::var("ESCROW_INITIAL_RELEASE") {
            Err(_) => defaults.initial_release,
            Ok(raw) => match raw.trim() {
                "on_threshold" => InitialReleasePolicy::OnThreshold,
                "manual" => InitialReleasePolicy::Manual,
                other => {
                    return Err(ConfigError::Invalid(
                        "ESCROW_INITIAL_RELEASE".to_string(),
                        format!("expected on_threshold or manual, got {other:?}"),
                    ))
                }
            },
        };
        Ok(Self {
            max_commit_attempts: env_parse("ESCROW_COMMIT_ATTEMPTS", defaults.max_commit_attempts)?
                .max(1),
            base_backoff: Duration::from_millis(env_parse(
                "ESCROW_COMMIT_BACKOFF_MS",
                defaults.base_backoff.as_millis() as u64,
            )?),
            commit_timeout: Duration::from_millis(env_parse(
                "ESCROW_COMMIT_TIMEOUT_MS",
                defaults.commit_timeout.as_millis() as u64,
            )?),
            read_retries: env_parse("ESCROW_READ_RETRIES", defaults.read_retries)?,
            initial_release,
        })
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        doubling(self.base_backoff, attempt)
    }
}

/// `base` doubled once per retry after the first.
fn doubling(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// Settings for [`crate::ReconciliationWorker`].
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            enabled: true,
        }
    }
}

impl ReconciliationConfig {
    /// Variables:
    /// - `ESCROW_RECONCILE_INTERVAL_SECS` (default: 15, minimum 1)
    /// - `ESCROW_RECONCILE_ENABLED` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            interval: Duration::from_secs(
                env_parse(
                    "ESCROW_RECONCILE_INTERVAL_SECS",
                    defaults.interval.as_secs(),
                )?
                .max(1),
            ),
            enabled: env_parse("ESCROW_RECONCILE_ENABLED", defaults.enabled)?,
        })
    }
}

/// Endpoints of the enrollment, watch-progress and identity services.
///
/// Custom `Debug` implementation redacts the `api_token` field.
#[derive(Clone)]
pub struct CollaboratorConfig {
    pub enrollment_url: Url,
    pub watch_progress_url: Url,
    pub identity_url: Url,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts for transport failures, 5xx and 429 responses.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry.
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for CollaboratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorConfig")
            .field("enrollment_url", &self.enrollment_url)
            .field("watch_progress_url", &self.watch_progress_url)
            .field("identity_url", &self.identity_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

const DEFAULT_COLLABORATOR_RETRIES: u32 = 3;
const DEFAULT_COLLABORATOR_BACKOFF_MS: u64 = 200;

const COLLABORATOR_URL_VARS: [&str; 3] = [
    "ESCROW_ENROLLMENT_URL",
    "ESCROW_WATCH_PROGRESS_URL",
    "ESCROW_IDENTITY_URL",
];

impl CollaboratorConfig {
    /// Load collaborator endpoints.
    ///
    /// Returns `Ok(None)` when none of the URL variables is set.
    ///
    /// Variables:
    /// - `ESCROW_ENROLLMENT_URL`, `ESCROW_WATCH_PROGRESS_URL`,
    ///   `ESCROW_IDENTITY_URL` (all or none)
    /// - `ESCROW_COLLABORATOR_TOKEN` (optional bearer token)
    /// - `ESCROW_COLLABORATOR_TIMEOUT_SECS` (default: 10)
    /// - `ESCROW_COLLABORATOR_RETRIES` (default: 3)
    /// - `ESCROW_COLLABORATOR_BACKOFF_MS` (default: 200)
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let present: Vec<&str> = COLLABORATOR_URL_VARS
            .iter()
            .copied()
            .filter(|v| std::env::var(v).is_ok())
            .collect();
        if present.is_empty() {
            return Ok(None);
        }
        if let Some(missing) = COLLABORATOR_URL_VARS
            .iter()
            .copied()
            .find(|v| !present.contains(v))
        {
            return Err(ConfigError::Missing(missing.to_string()));
        }
        Ok(Some(Self {
            enrollment_url: env_url("ESCROW_ENROLLMENT_URL")?,
            watch_progress_url: env_url("ESCROW_WATCH_PROGRESS_URL")?,
            identity_url: env_url("ESCROW_IDENTITY_URL")?,
            api_token: std::env::var("ESCROW_COLLABORATOR_TOKEN").ok(),
            timeout_secs: env_parse("ESCROW_COLLABORATOR_TIMEOUT_SECS", 10)?,
            max_retries: env_parse("ESCROW_COLLABORATOR_RETRIES", DEFAULT_COLLABORATOR_RETRIES)?,
            retry_backoff: Duration::from_millis(env_parse(
                "ESCROW_COLLABORATOR_BACKOFF_MS",
                DEFAULT_COLLABORATOR_BACKOFF_MS,
            )?),
        }))
    }

    /// All three services behind one base URL (local mocks, gateways).
    pub fn uniform(base: &str, api_token: Option<String>) -> Result<Self, ConfigError> {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(base.to_string(), e.to_string()))?;
        Ok(Self {
            enrollment_url: url.clone(),
            watch_progress_url: url.clone(),
            identity_url: url,
            api_token,
            timeout_secs: 5,
            max_retries: DEFAULT_COLLABORATOR_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_COLLABORATOR_BACKOFF_MS),
        })
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        doubling(self.retry_backoff, attempt)
    }
}

fn env_url(var: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(var).map_err(|_| ConfigError::Missing(var.to_string()))?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

fn env_parse<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(var.to_string(), e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}
