//! Token-issuing REST backend adapter.
//!
//! `POST {base}/api/admin/login` trades a username/password for a bearer
//! token; `GET {base}/api/auth/me` validates a persisted token on startup;
//! `POST {base}/api/admin/logout` revokes it.

use std::sync::Arc;

use gate::{AuthError, Credential, Credentials, ErrorCode, Identity};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Determination, IdentityListener, IdentityProvider, ProviderCore, build_http_client, log_determination,
    persist_or_warn, spawn_initial_check, transport_error,
};
use crate::config::RestConfig;
use crate::subscription::Subscription;
use crate::token_store::TokenStore;

const PROVIDER: &str = "rest";

pub const LOGIN_PATH: &str = "/api/admin/login";
pub const ME_PATH: &str = "/api/auth/me";
pub const LOGOUT_PATH: &str = "/api/admin/logout";

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
    user: Option<RestUser>,
    message: Option<String>,
}

/// User object as returned by the backend. Ids may be strings or numbers.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct RestUser {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl RestUser {
    fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_identity(self, credential: Credential) -> Result<Identity, AuthError> {
        let id = self
            .id_string()
            .ok_or_else(|| AuthError::NetworkUnavailable("backend returned a user without an id".to_owned()))?;
        let display_name = self.name.or(self.username).filter(|n| !n.is_empty());
        Ok(Identity::new(id, display_name, credential))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Wrapped { user: RestUser },
    Bare(RestUser),
}

// =============================================================================
// RESPONSE CLASSIFICATION
// =============================================================================

/// Errors every endpoint shares, keyed on status alone.
fn classify_status(status: StatusCode, endpoint: &str) -> Option<AuthError> {
    match status.as_u16() {
        401 | 403 => Some(AuthError::InvalidCredentials),
        404 | 405 => Some(AuthError::ProviderUnconfigured(format!("{endpoint} not served by the configured backend"))),
        408 | 429 | 500..=599 => Some(AuthError::NetworkUnavailable(format!("{endpoint} returned {status}"))),
        _ => None,
    }
}

pub(crate) fn classify_login(status: StatusCode, body: &str) -> Result<Identity, AuthError> {
    if let Some(err) = classify_status(status, LOGIN_PATH) {
        return Err(err);
    }
    let parsed: LoginResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::NetworkUnavailable(format!("unreadable login response: {e}")))?;
    if !status.is_success() || !parsed.success {
        if let Some(message) = parsed.message.as_deref() {
            tracing::info!(provider = PROVIDER, %message, "login rejected");
        }
        return Err(AuthError::InvalidCredentials);
    }
    match (parsed.token.filter(|t| !t.is_empty()), parsed.user) {
        (Some(token), Some(user)) => user.into_identity(Credential::new(token)),
        _ => Err(AuthError::NetworkUnavailable("login response missing token or user".to_owned())),
    }
}

pub(crate) fn classify_me(status: StatusCode, body: &str, credential: Credential) -> Result<Identity, AuthError> {
    if let Some(err) = classify_status(status, ME_PATH) {
        return Err(err);
    }
    if !status.is_success() {
        return Err(AuthError::InvalidCredentials);
    }
    let user = match serde_json::from_str::<MeResponse>(body) {
        Ok(MeResponse::Wrapped { user } | MeResponse::Bare(user)) => user,
        Err(e) => return Err(AuthError::NetworkUnavailable(format!("unreadable session response: {e}"))),
    };
    user.into_identity(credential)
}

/// Sign-out succeeds when the backend revoked the token or already considers
/// it invalid.
pub(crate) fn classify_logout(status: StatusCode) -> Result<(), AuthError> {
    if status.is_success() {
        return Ok(());
    }
    match classify_status(status, LOGOUT_PATH) {
        Some(AuthError::InvalidCredentials) => Ok(()),
        Some(err) => Err(err),
        None => Err(AuthError::NetworkUnavailable(format!("{LOGOUT_PATH} returned {status}"))),
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

struct RestBackend {
    http: reqwest::Client,
    base_url: String,
}

impl RestBackend {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn login(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { username: credentials.identifier.trim(), password: &credentials.secret })
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(&e))?;
        classify_login(status, &body)
    }

    async fn me(&self, credential: Credential) -> Result<Identity, AuthError> {
        let resp = self
            .http
            .get(self.url(ME_PATH))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(&e))?;
        classify_me(status, &body, credential)
    }

    async fn logout(&self, credential: &Credential) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(self.url(LOGOUT_PATH))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        classify_logout(resp.status())
    }
}

struct RestInner {
    backend: Option<RestBackend>,
    tokens: Arc<TokenStore>,
    core: ProviderCore,
}

/// Adapter for the token-issuing REST backend.
pub struct RestIdentityProvider {
    inner: Arc<RestInner>,
}

impl RestIdentityProvider {
    /// Build the adapter. Missing configuration yields an adapter that
    /// reports `ProviderUnconfigured` instead of failing construction.
    #[must_use]
    pub fn new(config: &RestConfig, tokens: Arc<TokenStore>) -> Self {
        let backend = match &config.base_url {
            Some(base_url) => build_http_client(config.timeout)
                .map(|http| RestBackend { http, base_url: base_url.clone() }),
            None => Err(AuthError::ProviderUnconfigured("ADMIN_API_BASE_URL is not set".to_owned())),
        };
        let (backend, core) = match backend {
            Ok(backend) => (Some(backend), ProviderCore::new()),
            Err(e) => {
                let determination = Determination::failed(e);
                log_determination(PROVIDER, &determination);
                (None, ProviderCore::settled(determination))
            }
        };
        Self { inner: Arc::new(RestInner { backend, tokens, core }) }
    }

    fn backend(&self) -> Result<&RestBackend, AuthError> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| AuthError::ProviderUnconfigured("ADMIN_API_BASE_URL is not set".to_owned()))
    }

    fn start_initial_check(&self) {
        let session = match self.inner.tokens.load_session() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "persisted session unreadable; starting signed out");
                None
            }
        };
        let Some(session) = session else {
            let determination = Determination::signed_out();
            log_determination(PROVIDER, &determination);
            self.inner.core.publish(determination);
            return;
        };

        let epoch = self.inner.core.epoch();
        let inner = Arc::clone(&self.inner);
        spawn_initial_check(&self.inner.core, async move {
            let Some(backend) = inner.backend.as_ref() else {
                return;
            };
            let stored_name = session.user.and_then(|u| u.name);
            let outcome = backend.me(session.token).await;
            let applied = inner.core.publish_if_current(epoch, || {
                let determination = match outcome {
                    Ok(mut identity) => {
                        if identity.display_name.is_none() {
                            identity.display_name = stored_name;
                        }
                        persist_or_warn(inner.tokens.save_session(&identity), "refresh stored user");
                        Determination::signed_in(identity)
                    }
                    Err(AuthError::InvalidCredentials) => {
                        persist_or_warn(inner.tokens.clear_session(), "clear rejected token");
                        Determination::failed(AuthError::InvalidCredentials)
                    }
                    Err(e) => Determination::failed(e),
                };
                log_determination(PROVIDER, &determination);
                determination
            });
            if !applied {
                tracing::debug!(provider = PROVIDER, "initial session check superseded");
            }
        });
    }
}

#[async_trait::async_trait]
impl IdentityProvider for RestIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.inner.core.current_identity()
    }

    fn subscribe(&self, listener: IdentityListener) -> Subscription {
        if self.inner.core.claim_initial_check() {
            self.start_initial_check();
        }
        self.inner.core.subscribe(listener)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let backend = self.backend()?;
        let identity = backend.login(credentials).await.inspect_err(|e| {
            tracing::warn!(provider = PROVIDER, error = %e, code = e.error_code(), "sign-in failed");
        })?;
        self.inner.core.publish_with(|| {
            persist_or_warn(self.inner.tokens.save_session(&identity), "store session");
            Determination::signed_in(identity.clone())
        });
        tracing::info!(provider = PROVIDER, user_id = %identity.id, "signed in");
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let backend = self.backend()?;
        let credential = match self.inner.core.current_identity() {
            Some(identity) => Some(identity.credential),
            None => self.inner.tokens.load_session().ok().flatten().map(|s| s.token),
        };
        if let Some(credential) = credential {
            backend.logout(&credential).await.inspect_err(|e| {
                tracing::warn!(provider = PROVIDER, error = %e, "sign-out failed; session kept");
            })?;
        }
        self.inner.core.publish_with(|| {
            persist_or_warn(self.inner.tokens.clear_session(), "clear session");
            Determination::signed_out()
        });
        tracing::info!(provider = PROVIDER, "signed out");
        Ok(())
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
