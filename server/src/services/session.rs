//! Bearer session management.
//!
//! ARCHITECTURE
//! ============
//! Sessions live in an in-memory table keyed by an opaque random token.
//! Every session expires after a fixed TTL; expired rows are dropped lazily
//! on lookup and in bulk by `purge_expired`.
//!
//! TRADE-OFFS
//! ==========
//! A restart signs every admin out. For a single admin account that is
//! cheaper than a session database, and clients already treat a rejected
//! token as "signed out".

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// User attached to a live session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

struct SessionEntry {
    user: SessionUser,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl SessionEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub struct SessionTable {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, sessions: Mutex::new(HashMap::new()) }
    }

    /// Create a session for `user`, returning the token.
    pub fn create(&self, user: SessionUser) -> String {
        self.create_at(user, Instant::now())
    }

    pub(crate) fn create_at(&self, user: SessionUser, now: Instant) -> String {
        let token = generate_token();
        let entry = SessionEntry { user, expires_at: now.checked_add(self.ttl) };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), entry);
        token
    }

    /// Validate a token and return the associated user.
    pub fn validate(&self, token: &str) -> Option<SessionUser> {
        self.validate_at(token, Instant::now())
    }

    pub(crate) fn validate_at(&self, token: &str, now: Instant) -> Option<SessionUser> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(token) {
            Some(entry) if entry.is_live(now) => Some(entry.user.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    /// Delete a session by token. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_live(now));
        before - sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
