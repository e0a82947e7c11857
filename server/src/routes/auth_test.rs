use super::*;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, HeaderValue, Request};

use crate::config::{AdminAccount, ServerConfig, StoredPassword};

fn state() -> AppState {
    AppState::new(&ServerConfig {
        port: 0,
        account: AdminAccount {
            id: "admin".into(),
            username: "admin".into(),
            display_name: "Administrator".into(),
            password: StoredPassword::Sha256 { digest: credentials::sha256_hex("", "password"), salt: String::new() },
        },
        session_ttl: Duration::from_secs(60),
    })
}

fn login_request(username: Option<&str>, password: Option<&str>) -> Json<LoginRequest> {
    Json(LoginRequest { username: username.map(str::to_owned), password: password.map(str::to_owned) })
}

async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn extract(state: &AppState, authorization: Option<&str>) -> Result<AdminAuth, StatusCode> {
    let mut builder = Request::builder().uri("/api/auth/me");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let (mut parts, ()) = builder.body(()).unwrap().into_parts();
    AdminAuth::from_request_parts(&mut parts, state).await
}

// =============================================================================
// bearer_token
// =============================================================================

#[test]
fn bearer_token_parses_scheme_case_insensitively() {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
    assert_eq!(bearer_token(&headers), Some("abc"));
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  xyz "));
    assert_eq!(bearer_token(&headers), Some("xyz"));
}

#[test]
fn bearer_token_rejects_other_schemes_and_blanks() {
    let mut headers = HeaderMap::new();
    assert_eq!(bearer_token(&headers), None);
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic YWRtaW4="));
    assert_eq!(bearer_token(&headers), None);
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
    assert_eq!(bearer_token(&headers), None);
}

// =============================================================================
// login
// =============================================================================

#[tokio::test]
async fn login_success_returns_token_and_user() {
    let state = state();
    let resp = login(State(state.clone()), login_request(Some("admin"), Some("password"))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["user"]["id"], "admin");
    assert_eq!(json["user"]["name"], "Administrator");
    let token = json["token"].as_str().unwrap();
    assert_eq!(token.len(), 64);
    assert!(state.sessions.validate(token).is_some());
}

#[tokio::test]
async fn login_wrong_password_is_401_with_message() {
    let state = state();
    let resp = login(State(state.clone()), login_request(Some("admin"), Some("nope"))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Invalid credentials");
    assert!(json.get("token").is_none());
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn login_missing_fields_is_400() {
    let resp = login(State(state()), login_request(Some("  "), Some("password"))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = login(State(state()), login_request(Some("admin"), None)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// AdminAuth / me / logout
// =============================================================================

#[tokio::test]
async fn extractor_requires_live_session() {
    let state = state();
    assert!(matches!(extract(&state, None).await, Err(StatusCode::UNAUTHORIZED)));
    assert!(matches!(extract(&state, Some("Bearer forged")).await, Err(StatusCode::UNAUTHORIZED)));

    let token = state.sessions.create(state.admin_user());
    let auth = extract(&state, Some(format!("Bearer {token}").as_str())).await.unwrap();
    assert_eq!(auth.user.id, "admin");
    assert_eq!(auth.token, token);
}

#[tokio::test]
async fn me_wraps_user() {
    let state = state();
    let token = state.sessions.create(state.admin_user());
    let auth = extract(&state, Some(format!("Bearer {token}").as_str())).await.unwrap();

    let Json(body) = me(auth).await;
    let json = serde_json::to_value(body).unwrap();
    assert_eq!(json, serde_json::json!({ "user": { "id": "admin", "name": "Administrator" } }));
}

#[tokio::test]
async fn logout_revokes_token() {
    let state = state();
    let token = state.sessions.create(state.admin_user());
    let auth = extract(&state, Some(format!("Bearer {token}").as_str())).await.unwrap();

    let resp = logout(State(state.clone()), auth).await.into_response();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(state.sessions.validate(&token), None);
}

#[tokio::test]
async fn login_accepts_argon2_account() {
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(8, 1, 1, None).unwrap(),
    );
    let phc = credentials::hash_password_with(&argon2, "correct horse").unwrap();
    let state = AppState::new(&ServerConfig {
        port: 0,
        account: AdminAccount {
            id: "admin".into(),
            username: "admin".into(),
            display_name: "Administrator".into(),
            password: StoredPassword::Argon2(phc),
        },
        session_ttl: Duration::from_secs(60),
    });

    let resp = login(State(state.clone()), login_request(Some("admin"), Some("correct horse"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = login(State(state.clone()), login_request(Some("admin"), Some("password"))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.sessions.len(), 1);
}
