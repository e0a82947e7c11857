//! Admin client configuration parsed from environment variables.
//!
//! Missing backend settings are not an error here: they produce a config
//! whose provider reports `ProviderUnconfigured` at runtime, so the gate
//! fails closed instead of the process refusing to start.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PENDING_THRESHOLD_MS: u64 = 5_000;
pub const DEFAULT_RESOLVE_BOUND_MS: u64 = 5_000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOGIN_PATH: &str = "/admin/login";
pub const DEFAULT_SESSION_PATH: &str = ".mipl-admin/session.json";
pub const DEFAULT_FIREBASE_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_FIREBASE_TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@microcircuits.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown ADMIN_AUTH_PROVIDER: {0} (expected 'rest' or 'firebase')")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Rest,
    Firebase,
}

/// Settings for the token-issuing REST backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// Base URL without trailing slash. `None` leaves the adapter unconfigured.
    pub base_url: Option<String>,
    pub timeout: Duration,
}

/// Settings for the managed Firebase auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    /// Web API key. `None` leaves the adapter unconfigured.
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub auth_base_url: String,
    /// Secure token service used to renew expired ID tokens.
    pub token_base_url: String,
    /// Email used when a bare username (no `@`) is submitted.
    pub default_admin_email: String,
    pub timeout: Duration,
}

/// Timing knobs shared by the session store and the protected view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTimings {
    /// Elapsed pending time after which the override prompt is offered.
    pub pending_threshold: Duration,
    /// How long the store waits for a first provider answer before warning.
    pub resolve_bound: Duration,
}

impl Default for GateTimings {
    fn default() -> Self {
        Self {
            pending_threshold: Duration::from_millis(DEFAULT_PENDING_THRESHOLD_MS),
            resolve_bound: Duration::from_millis(DEFAULT_RESOLVE_BOUND_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    pub provider: ProviderKind,
    pub rest: RestConfig,
    pub firebase: FirebaseConfig,
    pub session_path: PathBuf,
    pub timings: GateTimings,
    pub login_path: String,
}

impl AdminConfig {
    /// Build typed admin config from environment variables.
    ///
    /// - `ADMIN_AUTH_PROVIDER`: `rest` (default) or `firebase`
    /// - `ADMIN_API_BASE_URL`: REST backend base URL
    /// - `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID`: managed auth project
    /// - `FIREBASE_AUTH_BASE_URL`: Identity Toolkit base URL override
    /// - `FIREBASE_TOKEN_BASE_URL`: secure token service base URL override
    /// - `FIREBASE_DEFAULT_ADMIN_EMAIL`: default `admin@microcircuits.com`
    /// - `ADMIN_SESSION_PATH`: persisted session file
    /// - `ADMIN_PENDING_THRESHOLD_MS`: default 5000
    /// - `ADMIN_RESOLVE_BOUND_MS`: default 5000
    /// - `ADMIN_HTTP_TIMEOUT_SECS`: default 10
    /// - `ADMIN_LOGIN_PATH`: default `/admin/login`
    ///
    /// # Errors
    ///
    /// Returns an error if `ADMIN_AUTH_PROVIDER` names an unknown provider.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = parse_provider(env_non_empty("ADMIN_AUTH_PROVIDER").as_deref())?;
        let timeout = Duration::from_secs(env_parse("ADMIN_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS));

        let rest = RestConfig { base_url: env_non_empty("ADMIN_API_BASE_URL").map(|url| trim_base_url(&url)), timeout };

        let firebase = FirebaseConfig {
            api_key: env_non_empty("FIREBASE_API_KEY"),
            project_id: env_non_empty("FIREBASE_PROJECT_ID"),
            auth_base_url: trim_base_url(
                &env_non_empty("FIREBASE_AUTH_BASE_URL").unwrap_or_else(|| DEFAULT_FIREBASE_AUTH_BASE_URL.to_owned()),
            ),
            token_base_url: trim_base_url(
                &env_non_empty("FIREBASE_TOKEN_BASE_URL").unwrap_or_else(|| DEFAULT_FIREBASE_TOKEN_BASE_URL.to_owned()),
            ),
            default_admin_email: env_non_empty("FIREBASE_DEFAULT_ADMIN_EMAIL")
                .unwrap_or_else(|| DEFAULT_ADMIN_EMAIL.to_owned()),
            timeout,
        };

        let timings = GateTimings {
            pending_threshold: Duration::from_millis(env_parse(
                "ADMIN_PENDING_THRESHOLD_MS",
                DEFAULT_PENDING_THRESHOLD_MS,
            )),
            resolve_bound: Duration::from_millis(env_parse("ADMIN_RESOLVE_BOUND_MS", DEFAULT_RESOLVE_BOUND_MS)),
        };

        Ok(Self {
            provider,
            rest,
            firebase,
            session_path: env_non_empty("ADMIN_SESSION_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_SESSION_PATH), PathBuf::from),
            timings,
            login_path: env_non_empty("ADMIN_LOGIN_PATH").unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_owned()),
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}

fn parse_provider(raw: Option<&str>) -> Result<ProviderKind, ConfigError> {
    match raw.unwrap_or("rest").to_ascii_lowercase().as_str() {
        "rest" => Ok(ProviderKind::Rest),
        "firebase" => Ok(ProviderKind::Firebase),
        other => Err(ConfigError::UnknownProvider(other.to_owned())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
