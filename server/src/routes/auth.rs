//! Auth routes: admin login, session lookup, logout.
//!
//! Wire shape matches what the admin panel has always spoken:
//! `{"success": bool, "token", "user": {"id", "name"}, "message"}`.

use axum::extract::{FromRef, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::services::{credentials, session};
use crate::state::AppState;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Admin resolved from the `Authorization: Bearer` header.
/// Use as a handler parameter to require authentication.
pub struct AdminAuth {
    pub user: session::SessionUser,
    pub token: String,
}

pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> axum::extract::FromRequestParts<S> for AdminAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;
        let app_state = AppState::from_ref(state);
        let user = app_state.sessions.validate(token).ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(Self { user, token: token.to_owned() })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<session::SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl LoginResponse {
    fn failure(status: StatusCode, message: &str) -> Response {
        let body = Self { success: false, token: None, user: None, message: Some(message.to_owned()) };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    user: session::SessionUser,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/admin/login`: verify credentials and issue a bearer token.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let (Some(username), Some(password)) = (req.username.filter(|u| !u.trim().is_empty()), req.password) else {
        return LoginResponse::failure(StatusCode::BAD_REQUEST, "Username and password are required");
    };

    let account = std::sync::Arc::clone(&state.account);
    let candidate = username.clone();
    let verified = tokio::task::spawn_blocking(move || credentials::verify(&account, &candidate, &password))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "password verification task failed");
            false
        });
    if !verified {
        tracing::warn!(username = %username.trim(), "admin login rejected");
        return LoginResponse::failure(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    let user = state.admin_user();
    let token = state.sessions.create(user.clone());
    tracing::info!(user_id = %user.id, "admin login");
    Json(LoginResponse { success: true, token: Some(token), user: Some(user), message: None }).into_response()
}

/// `GET /api/auth/me`: return the admin behind the bearer token.
pub async fn me(auth: AdminAuth) -> Json<MeResponse> {
    Json(MeResponse { user: auth.user })
}

/// `POST /api/admin/logout`: revoke the bearer token.
pub async fn logout(State(state): State<AppState>, auth: AdminAuth) -> impl IntoResponse {
    state.sessions.revoke(&auth.token);
    tracing::info!(user_id = %auth.user.id, "admin logout");
    StatusCode::NO_CONTENT
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
