use super::*;
use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "PORT",
    "ADMIN_USERNAME",
    "ADMIN_USER_ID",
    "ADMIN_DISPLAY_NAME",
    "ADMIN_PASSWORD_HASH",
    "ADMIN_PASSWORD_SHA256",
    "ADMIN_PASSWORD_SALT",
    "ADMIN_SESSION_TTL_SECS",
];

const HASH: &str = "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8";

/// # Safety
/// Callers must hold `ENV_LOCK`.
unsafe fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn password_hash_is_required() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };
    assert!(matches!(ServerConfig::from_env(), Err(ConfigError::Missing("ADMIN_PASSWORD_HASH"))));
}

#[test]
fn malformed_hash_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("ADMIN_PASSWORD_SHA256", "password");
    }
    assert!(matches!(ServerConfig::from_env(), Err(ConfigError::InvalidPasswordHash)));
    unsafe { clear_env() };
}

#[test]
fn defaults_apply_around_required_hash() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("ADMIN_PASSWORD_SHA256", HASH.to_ascii_uppercase());
    }
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.account.username, DEFAULT_ADMIN_USERNAME);
    assert_eq!(config.account.id, DEFAULT_ADMIN_USER_ID);
    assert_eq!(config.account.display_name, DEFAULT_ADMIN_DISPLAY_NAME);
    assert_eq!(config.account.password, StoredPassword::Sha256 { digest: HASH.to_owned(), salt: String::new() });
    assert_eq!(config.session_ttl, Duration::from_secs(DEFAULT_SESSION_TTL_SECS));
    unsafe { clear_env() };
}

#[test]
fn overrides_are_read() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("ADMIN_PASSWORD_SHA256", HASH);
        std::env::set_var("PORT", "8080");
        std::env::set_var("ADMIN_USERNAME", "ops");
        std::env::set_var("ADMIN_DISPLAY_NAME", "Site Admin");
        std::env::set_var("ADMIN_SESSION_TTL_SECS", "60");
        std::env::set_var("ADMIN_PASSWORD_SALT", "pepper-1");
    }
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.account.username, "ops");
    assert_eq!(config.account.display_name, "Site Admin");
    assert_eq!(config.session_ttl, Duration::from_secs(60));
    assert_eq!(config.account.password, StoredPassword::Sha256 { digest: HASH.to_owned(), salt: "pepper-1".to_owned() });
    unsafe { clear_env() };
}

#[test]
fn session_ttl_out_of_range_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for ttl in ["0", "18446744073709551615"] {
        unsafe {
            clear_env();
            std::env::set_var("ADMIN_PASSWORD_SHA256", HASH);
            std::env::set_var("ADMIN_SESSION_TTL_SECS", ttl);
        }
        assert!(matches!(ServerConfig::from_env(), Err(ConfigError::InvalidSessionTtl(_))), "{ttl}");
    }
    unsafe { clear_env() };
}

#[test]
fn argon2_phc_hash_is_preferred() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(8, 1, 1, None).unwrap(),
    );
    let phc = crate::services::credentials::hash_password_with(&argon2, "pw").unwrap();
    let phc = phc.as_str();
    unsafe {
        clear_env();
        std::env::set_var("ADMIN_PASSWORD_HASH", phc);
        std::env::set_var("ADMIN_PASSWORD_SHA256", HASH);
    }
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.account.password, StoredPassword::Argon2(phc.to_owned()));
    unsafe { clear_env() };
}

#[test]
fn non_argon2_phc_hash_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for value in ["plaintext", "$pbkdf2-sha256$i=1000$c2FsdA$aGFzaA"] {
        unsafe {
            clear_env();
            std::env::set_var("ADMIN_PASSWORD_HASH", value);
        }
        assert!(matches!(ServerConfig::from_env(), Err(ConfigError::InvalidPhcHash(_))), "{value}");
    }
    unsafe { clear_env() };
}
