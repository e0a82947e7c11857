//! Server configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
/// One year.
pub const MAX_SESSION_TTL_SECS: u64 = 31_536_000;
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_USER_ID: &str = "admin";
pub const DEFAULT_ADMIN_DISPLAY_NAME: &str = "Administrator";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("ADMIN_PASSWORD_HASH must be an Argon2 PHC string: {0}")]
    InvalidPhcHash(String),
    #[error("ADMIN_PASSWORD_SHA256 must be 64 hex characters")]
    InvalidPasswordHash,
    #[error("ADMIN_SESSION_TTL_SECS must be between 1 and {MAX_SESSION_TTL_SECS}, got {0}")]
    InvalidSessionTtl(u64),
}

/// How the admin password is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPassword {
    /// Argon2 PHC string (`$argon2id$v=19$...`).
    Argon2(String),
    /// Lowercase hex SHA-256 of `salt` followed by the password. `salt` is
    /// empty for an unsalted digest.
    Sha256 { digest: String, salt: String },
}

/// The single admin account this backend signs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub password: StoredPassword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub account: AdminAccount,
    pub session_ttl: Duration,
}

impl ServerConfig {
    /// Build server config from environment variables.
    ///
    /// - `PORT`: default 3000
    /// - `ADMIN_USERNAME`: default `admin`
    /// - `ADMIN_USER_ID`: default `admin`
    /// - `ADMIN_DISPLAY_NAME`: default `Administrator`
    /// - `ADMIN_PASSWORD_HASH`: Argon2 PHC string; preferred
    /// - `ADMIN_PASSWORD_SHA256`: hex digest, used when no PHC hash is set
    /// - `ADMIN_PASSWORD_SALT`: prefix hashed with the SHA-256 password
    /// - `ADMIN_SESSION_TTL_SECS`: default 86400, at most one year
    ///
    /// # Errors
    ///
    /// Returns an error if no password hash is set or it is malformed, or the
    /// session TTL is zero or longer than a year.
    pub fn from_env() -> Result<Self, ConfigError> {
        let password = stored_password_from_env()?;
        let ttl_secs = env_parse("ADMIN_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS);
        if !(1..=MAX_SESSION_TTL_SECS).contains(&ttl_secs) {
            return Err(ConfigError::InvalidSessionTtl(ttl_secs));
        }

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            account: AdminAccount {
                id: env_or("ADMIN_USER_ID", DEFAULT_ADMIN_USER_ID),
                username: env_or("ADMIN_USERNAME", DEFAULT_ADMIN_USERNAME),
                display_name: env_or("ADMIN_DISPLAY_NAME", DEFAULT_ADMIN_DISPLAY_NAME),
                password,
            },
            session_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

fn stored_password_from_env() -> Result<StoredPassword, ConfigError> {
    if let Some(phc) = env_non_empty("ADMIN_PASSWORD_HASH") {
        let parsed = argon2::password_hash::PasswordHash::new(&phc)
            .map_err(|e| ConfigError::InvalidPhcHash(e.to_string()))?;
        if !parsed.algorithm.as_str().starts_with("argon2") {
            return Err(ConfigError::InvalidPhcHash(format!("unsupported algorithm {}", parsed.algorithm)));
        }
        return Ok(StoredPassword::Argon2(phc));
    }

    let digest = env_non_empty("ADMIN_PASSWORD_SHA256")
        .map(|v| v.to_ascii_lowercase())
        .ok_or(ConfigError::Missing("ADMIN_PASSWORD_HASH"))?;
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidPasswordHash);
    }
    let salt = std::env::var("ADMIN_PASSWORD_SALT").unwrap_or_default();
    Ok(StoredPassword::Sha256 { digest, salt })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_or(key: &str, default: &str) -> String {
    env_non_empty(key).unwrap_or_else(|| default.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
