use super::*;
use std::sync::Mutex;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use crate::token_store::ADMIN_TOKEN_KEY;

fn config(api_key: Option<&str>, base: &str) -> FirebaseConfig {
    FirebaseConfig {
        api_key: api_key.map(str::to_owned),
        project_id: Some("mipl-site".to_owned()),
        auth_base_url: format!("{base}/v1"),
        token_base_url: format!("{base}/st"),
        default_admin_email: "admin@microcircuits.com".to_owned(),
        timeout: Duration::from_secs(2),
    }
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": { "code": 400, "message": message } }).to_string()
}

fn recording_listener() -> (IdentityListener, Arc<Mutex<Vec<Determination>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: IdentityListener = Arc::new(move |d: &Determination| sink.lock().unwrap().push(d.clone()));
    (listener, seen)
}

// =============================================================================
// Fake Identity Toolkit
// =============================================================================

fn fail(message: &str) -> Response {
    (axum::http::StatusCode::BAD_REQUEST, error_body(message)).into_response()
}

fn ok(value: serde_json::Value) -> Response {
    axum::Json(value).into_response()
}

/// Accepts password `pw` for any email, issues `id-1`/`r-1`, treats `id-1`
/// as expired on lookup, and renews `r-1` into `id-2`/`r-2`.
async fn fake_toolkit(uri: Uri, body: Bytes) -> Response {
    let path = uri.path();
    if path.ends_with("/token") {
        let form = String::from_utf8_lossy(&body);
        return if form.contains("refresh_token=r-1") {
            ok(serde_json::json!({ "id_token": "id-2", "refresh_token": "r-2", "user_id": "u1" }))
        } else {
            fail("INVALID_REFRESH_TOKEN")
        };
    }

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    if path.ends_with("accounts:signInWithPassword") || path.ends_with("accounts:signUp") {
        let email = json["email"].as_str().unwrap_or_default().to_owned();
        if path.ends_with("accounts:signUp") && email == "taken@microcircuits.com" {
            return fail("EMAIL_EXISTS");
        }
        if json["password"] != "pw" {
            return fail("INVALID_LOGIN_CREDENTIALS");
        }
        return ok(serde_json::json!({
            "localId": "u1",
            "email": email,
            "idToken": "id-1",
            "refreshToken": "r-1",
            "expiresIn": "3600",
        }));
    }
    if path.ends_with("accounts:lookup") {
        return match json["idToken"].as_str() {
            Some("id-2") => ok(serde_json::json!({
                "users": [{ "localId": "u1", "email": "admin@microcircuits.com", "displayName": "Site Admin" }]
            })),
            Some("id-1") => fail("TOKEN_EXPIRED"),
            _ => fail("INVALID_ID_TOKEN"),
        };
    }
    (axum::http::StatusCode::NOT_FOUND, "").into_response()
}

async fn spawn_fake() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(fake_toolkit);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn first_determination(provider: &FirebaseIdentityProvider) -> (Determination, Subscription) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let sub = provider.subscribe(Arc::new(move |d: &Determination| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(d.clone());
        }
    }));
    let determination = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    (determination, sub)
}

// =============================================================================
// resolve_email
// =============================================================================

#[test]
fn bare_username_maps_to_admin_email() {
    assert_eq!(resolve_email("admin", "admin@microcircuits.com"), "admin@microcircuits.com");
    assert_eq!(resolve_email("  admin ", "ops@example.com"), "ops@example.com");
}

#[test]
fn email_passes_through_trimmed() {
    assert_eq!(resolve_email(" lab@microcircuits.com ", "admin@microcircuits.com"), "lab@microcircuits.com");
}

// =============================================================================
// classify_error
// =============================================================================

#[test]
fn wrong_password_codes_are_invalid_credentials() {
    for code in ["INVALID_PASSWORD", "EMAIL_NOT_FOUND", "INVALID_LOGIN_CREDENTIALS", "USER_DISABLED"] {
        assert_eq!(classify_error(StatusCode::BAD_REQUEST, &error_body(code)), AuthError::InvalidCredentials, "{code}");
    }
}

#[test]
fn project_codes_are_unconfigured() {
    for code in ["CONFIGURATION_NOT_FOUND", "OPERATION_NOT_ALLOWED", "PROJECT_NOT_FOUND"] {
        let err = classify_error(StatusCode::BAD_REQUEST, &error_body(code));
        assert!(matches!(err, AuthError::ProviderUnconfigured(_)), "{code}");
    }
}

#[test]
fn bad_api_key_message_is_unconfigured() {
    let body = error_body("API key not valid. Please pass a valid API key.");
    assert!(matches!(classify_error(StatusCode::BAD_REQUEST, &body), AuthError::ProviderUnconfigured(_)));
}

#[test]
fn throttling_is_network_unavailable() {
    let body = error_body("TOO_MANY_ATTEMPTS_TRY_LATER : Access to this account has been temporarily disabled");
    let err = classify_error(StatusCode::BAD_REQUEST, &body);
    assert!(matches!(err, AuthError::NetworkUnavailable(_)));
    assert!(err.retryable());
}

#[test]
fn unknown_codes_fall_back_on_status() {
    assert_eq!(classify_error(StatusCode::BAD_REQUEST, &error_body("SOMETHING_NEW")), AuthError::InvalidCredentials);
    assert!(matches!(classify_error(StatusCode::NOT_FOUND, ""), AuthError::ProviderUnconfigured(_)));
    assert!(matches!(classify_error(StatusCode::TOO_MANY_REQUESTS, ""), AuthError::NetworkUnavailable(_)));
    assert!(matches!(classify_error(StatusCode::SERVICE_UNAVAILABLE, "<html>"), AuthError::NetworkUnavailable(_)));
}

// =============================================================================
// Adapter without configuration
// =============================================================================

#[test]
fn missing_api_key_answers_synchronously() {
    let provider = FirebaseIdentityProvider::new(&config(None, "http://127.0.0.1:9"), Arc::new(TokenStore::in_memory()));
    let (listener, seen) = recording_listener();
    let _sub = provider.subscribe(listener);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0].error, Some(AuthError::ProviderUnconfigured(_))));
}

#[tokio::test]
async fn missing_api_key_rejects_sign_in_and_register() {
    let provider = FirebaseIdentityProvider::new(&config(None, "http://127.0.0.1:9"), Arc::new(TokenStore::in_memory()));
    let err = provider.sign_in(&Credentials::new("admin", "pw")).await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderUnconfigured(_)));
    let err = provider.register("new@microcircuits.com", "pw").await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderUnconfigured(_)));
}

#[tokio::test]
async fn no_persisted_token_resolves_signed_out() {
    let provider =
        FirebaseIdentityProvider::new(&config(Some("key"), "http://127.0.0.1:9"), Arc::new(TokenStore::in_memory()));
    let (listener, seen) = recording_listener();
    let _sub = provider.subscribe(listener);
    assert_eq!(*seen.lock().unwrap(), vec![Determination::signed_out()]);
}

// =============================================================================
// Adapter against the fake toolkit
// =============================================================================

#[tokio::test]
async fn sign_in_maps_username_and_persists_tokens() {
    let base = spawn_fake().await;
    let tokens = Arc::new(TokenStore::in_memory());
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));

    let identity = provider.sign_in(&Credentials::new("admin", "pw")).await.unwrap();
    assert_eq!(identity.id, "u1");
    assert_eq!(identity.display_name.as_deref(), Some("admin@microcircuits.com"));
    assert_eq!(provider.current_identity(), Some(identity));
    assert_eq!(tokens.get(ADMIN_TOKEN_KEY).unwrap().as_deref(), Some("id-1"));
    assert_eq!(tokens.get(ADMIN_REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r-1"));
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let base = spawn_fake().await;
    let tokens = Arc::new(TokenStore::in_memory());
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));

    let err = provider.sign_in(&Credentials::new("admin", "nope")).await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(tokens.load_session().unwrap(), None);
}

#[tokio::test]
async fn register_signs_in_new_account() {
    let base = spawn_fake().await;
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::new(TokenStore::in_memory()));

    let identity = provider.register("lab@microcircuits.com", "pw").await.unwrap();
    assert_eq!(identity.display_name.as_deref(), Some("lab@microcircuits.com"));
    assert_eq!(provider.current_identity().map(|i| i.id), Some("u1".to_owned()));

    let err = provider.register("taken@microcircuits.com", "pw").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn expired_token_is_renewed_on_restore() {
    let base = spawn_fake().await;
    let tokens = Arc::new(TokenStore::in_memory());
    tokens.set(ADMIN_TOKEN_KEY, "id-1").unwrap();
    tokens.set(ADMIN_REFRESH_TOKEN_KEY, "r-1").unwrap();
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));

    let (determination, _sub) = first_determination(&provider).await;
    let identity = determination.identity.unwrap();
    assert_eq!(identity.display_name.as_deref(), Some("Site Admin"));
    assert_eq!(identity.credential.expose(), "id-2");
    assert_eq!(tokens.get(ADMIN_TOKEN_KEY).unwrap().as_deref(), Some("id-2"));
    assert_eq!(tokens.get(ADMIN_REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r-2"));
}

#[tokio::test]
async fn rejected_token_without_refresh_clears_session() {
    let base = spawn_fake().await;
    let tokens = Arc::new(TokenStore::in_memory());
    tokens.set(ADMIN_TOKEN_KEY, "forged").unwrap();
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));

    let (determination, _sub) = first_determination(&provider).await;
    assert_eq!(determination, Determination::failed(AuthError::InvalidCredentials));
    assert_eq!(tokens.load_session().unwrap(), None);
}

#[tokio::test]
async fn sign_out_forgets_tokens_and_notifies() {
    let base = spawn_fake().await;
    let tokens = Arc::new(TokenStore::in_memory());
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));
    provider.sign_in(&Credentials::new("admin", "pw")).await.unwrap();

    let (listener, seen) = recording_listener();
    let _sub = provider.subscribe(listener);
    provider.sign_out().await.unwrap();

    assert_eq!(seen.lock().unwrap().last(), Some(&Determination::signed_out()));
    assert_eq!(tokens.get(ADMIN_REFRESH_TOKEN_KEY).unwrap(), None);
    assert_eq!(provider.current_identity(), None);
}

// =============================================================================
// Initial check racing an explicit sign-in
// =============================================================================

#[derive(Default)]
struct HeldLookup {
    release: tokio::sync::Notify,
    answered: tokio::sync::Notify,
}

/// The fake toolkit, except `accounts:lookup` waits until released.
async fn spawn_held_toolkit(held: Arc<HeldLookup>) -> String {
    let app = axum::Router::new().fallback(move |uri: Uri, body: Bytes| {
        let held = Arc::clone(&held);
        async move {
            if uri.path().ends_with("accounts:lookup") {
                held.release.notified().await;
                held.answered.notify_one();
                return fail("INVALID_ID_TOKEN");
            }
            fake_toolkit(uri, body).await
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn lookup_finishing_after_sign_in_is_discarded() {
    let held = Arc::new(HeldLookup::default());
    let base = spawn_held_toolkit(Arc::clone(&held)).await;
    let tokens = Arc::new(TokenStore::in_memory());
    tokens.set(ADMIN_TOKEN_KEY, "stale").unwrap();
    let provider = FirebaseIdentityProvider::new(&config(Some("key"), &base), Arc::clone(&tokens));
    let (listener, seen) = recording_listener();
    let _sub = provider.subscribe(listener);

    let identity = provider.sign_in(&Credentials::new("admin", "pw")).await.unwrap();
    held.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), held.answered.notified()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*seen.lock().unwrap(), vec![Determination::signed_in(identity.clone())]);
    assert_eq!(provider.current_identity(), Some(identity));
    assert_eq!(tokens.get(ADMIN_TOKEN_KEY).unwrap().as_deref(), Some("id-1"));
    assert_eq!(tokens.get(ADMIN_REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r-1"));
}
