//! Password verification for the configured admin account.
//!
//! DESIGN
//! ======
//! The preferred stored form is an Argon2 PHC string (`ADMIN_PASSWORD_HASH`),
//! produced by `mipl-admin-server hash-password`. A hex SHA-256 digest of
//! `salt || password` is still accepted for existing deployments; a single
//! fast hash only resists offline guessing when the password is a long
//! random secret.

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use sha2::{Digest, Sha256};

use super::session::bytes_to_hex;
use crate::config::{AdminAccount, StoredPassword};

#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

/// Hash `password` into an Argon2id PHC string with default parameters and
/// a random 16-byte salt.
///
/// # Errors
///
/// Returns an error if the hasher rejects its input.
pub fn hash_password(password: &str) -> Result<String, HashError> {
    hash_password_with(&Argon2::default(), password)
}

pub(crate) fn hash_password_with(argon2: &Argon2<'_>, password: &str) -> Result<String, HashError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>()).map_err(|e| HashError(e.to_string()))?;
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| HashError(e.to_string()))
}

/// Lowercase hex SHA-256 of `salt` followed by `password`.
#[must_use]
pub fn sha256_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn password_matches(stored: &StoredPassword, password: &str) -> bool {
    match stored {
        StoredPassword::Argon2(phc) => PasswordHash::new(phc)
            .is_ok_and(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()),
        StoredPassword::Sha256 { digest, salt } => {
            constant_time_eq(sha256_hex(salt, password).as_bytes(), digest.as_bytes())
        }
    }
}

/// Whether `username`/`password` match `account`. Usernames compare
/// case-insensitively. Argon2 verification is CPU-bound; call this off the
/// async workers.
#[must_use]
pub fn verify(account: &AdminAccount, username: &str, password: &str) -> bool {
    let username_ok = username.trim().eq_ignore_ascii_case(&account.username);
    let password_ok = password_matches(&account.password, password);
    username_ok && password_ok
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
