//! Persisted client-side session state.
//!
//! A small string key/value store that plays the role browser local storage
//! plays for the web admin panel: the bearer token lives under `adminToken`
//! and the signed-in user under `adminUser` (as a JSON string), so a session
//! survives process restarts. Managed-auth sessions also keep a refresh token
//! under `adminRefreshToken`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use gate::{Credential, Identity};
use serde::{Deserialize, Serialize};

pub const ADMIN_TOKEN_KEY: &str = "adminToken";
pub const ADMIN_USER_KEY: &str = "adminUser";
pub const ADMIN_REFRESH_TOKEN_KEY: &str = "adminRefreshToken";

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// User record persisted next to the token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Token plus the user it was issued for, as read back from storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedSession {
    pub token: Credential,
    pub user: Option<StoredUser>,
}

type Entries = BTreeMap<String, String>;

enum Backend {
    File(PathBuf),
    Memory(Mutex<Entries>),
}

pub struct TokenStore {
    backend: Backend,
}

impl TokenStore {
    /// Store backed by a JSON object file. The file is created on first write.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { backend: Backend::File(path.into()) }
    }

    /// Process-local store, for tests and one-shot tools.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { backend: Backend::Memory(Mutex::new(Entries::new())) }
    }

    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read or parsed.
    pub fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read or written.
    pub fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read or written.
    pub fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    /// Read back the persisted session, if a token is present.
    ///
    /// An unreadable `adminUser` entry is dropped rather than failing the
    /// whole load; the token alone is enough to re-validate the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read or parsed.
    pub fn load_session(&self) -> Result<Option<PersistedSession>, TokenStoreError> {
        let entries = self.read_entries()?;
        let Some(token) = entries.get(ADMIN_TOKEN_KEY).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let user = entries.get(ADMIN_USER_KEY).and_then(|raw| match serde_json::from_str::<StoredUser>(raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable persisted admin user");
                None
            }
        });
        Ok(Some(PersistedSession { token: Credential::new(token.clone()), user }))
    }

    /// Persist `identity`'s token and user record together.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be written.
    pub fn save_session(&self, identity: &Identity) -> Result<(), TokenStoreError> {
        let user = serde_json::to_string(&StoredUser { id: identity.id.clone(), name: identity.display_name.clone() })?;
        self.update(|entries| {
            entries.insert(ADMIN_TOKEN_KEY.to_owned(), identity.credential.expose().to_owned());
            entries.insert(ADMIN_USER_KEY.to_owned(), user);
        })
    }

    /// # Errors
    ///
    /// Returns an error if the backing file cannot be written.
    pub fn clear_session(&self) -> Result<(), TokenStoreError> {
        self.update(|entries| {
            entries.remove(ADMIN_TOKEN_KEY);
            entries.remove(ADMIN_USER_KEY);
            entries.remove(ADMIN_REFRESH_TOKEN_KEY);
        })
    }

    fn read_entries(&self) -> Result<Entries, TokenStoreError> {
        match &self.backend {
            Backend::File(path) => read_file(path),
            Backend::Memory(entries) => Ok(entries.lock().unwrap_or_else(PoisonError::into_inner).clone()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Entries)) -> Result<(), TokenStoreError> {
        match &self.backend {
            Backend::File(path) => {
                let mut entries = read_file(path)?;
                f(&mut entries);
                write_file(path, &entries)
            }
            Backend::Memory(entries) => {
                f(&mut entries.lock().unwrap_or_else(PoisonError::into_inner));
                Ok(())
            }
        }
    }
}

fn read_file(path: &Path) -> Result<Entries, TokenStoreError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(Entries::new()),
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_file(path: &Path, entries: &Entries) -> Result<(), TokenStoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
    restrict_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "token_store_test.rs"]
mod tests;
