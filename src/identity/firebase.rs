//! Managed auth adapter for a Firebase project.
//!
//! Talks to the Identity Toolkit v1 REST API with the project's web API key:
//! `accounts:signInWithPassword`, `accounts:signUp`, and `accounts:lookup`.
//! Expired ID tokens are renewed through the secure token endpoint using the
//! persisted refresh token, the way the browser SDK keeps a session alive
//! across reloads.

use std::sync::Arc;

use gate::{AuthError, Credential, Credentials, ErrorCode, Identity};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    Determination, IdentityListener, IdentityProvider, ProviderCore, build_http_client, log_determination,
    persist_or_warn, spawn_initial_check, transport_error,
};
use crate::config::FirebaseConfig;
use crate::subscription::Subscription;
use crate::token_store::{ADMIN_REFRESH_TOKEN_KEY, PersistedSession, TokenStore};

const PROVIDER: &str = "firebase";

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Signed-in result: the identity plus the refresh token to persist.
struct SignedIn {
    identity: Identity,
    refresh_token: Option<String>,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Map a bare username to the configured admin email; emails pass through.
#[must_use]
pub fn resolve_email(identifier: &str, default_admin_email: &str) -> String {
    let identifier = identifier.trim();
    if identifier.contains('@') { identifier.to_owned() } else { default_admin_email.to_owned() }
}

fn display_name(display_name: Option<String>, email: Option<String>) -> Option<String> {
    display_name.filter(|n| !n.is_empty()).or(email.filter(|e| !e.is_empty()))
}

/// Leading error code of a Firebase error message, e.g.
/// `"TOO_MANY_ATTEMPTS_TRY_LATER : Access disabled"` → `"TOO_MANY_ATTEMPTS_TRY_LATER"`.
fn error_code(message: &str) -> &str {
    message.split([' ', ':']).next().unwrap_or_default()
}

/// Classify a non-success Identity Toolkit response.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_default();

    if message.starts_with("API key not valid") {
        return AuthError::ProviderUnconfigured("firebase API key rejected".to_owned());
    }
    match error_code(&message) {
        "INVALID_PASSWORD" | "EMAIL_NOT_FOUND" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" | "INVALID_EMAIL"
        | "MISSING_PASSWORD" | "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_NOT_FOUND" | "INVALID_REFRESH_TOKEN"
        | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" | "EMAIL_EXISTS" | "WEAK_PASSWORD" => AuthError::InvalidCredentials,
        "API_KEY_INVALID" | "CONFIGURATION_NOT_FOUND" | "PROJECT_NOT_FOUND" | "OPERATION_NOT_ALLOWED"
        | "ADMIN_ONLY_OPERATION" => AuthError::ProviderUnconfigured(format!("firebase rejected request: {message}")),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::NetworkUnavailable(message.clone()),
        _ => match status.as_u16() {
            403 | 404 => AuthError::ProviderUnconfigured(format!("firebase returned {status}")),
            400..=499 if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::REQUEST_TIMEOUT => {
                AuthError::InvalidCredentials
            }
            _ => AuthError::NetworkUnavailable(format!("firebase returned {status}")),
        },
    }
}

fn parse_success<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, AuthError> {
    serde_json::from_str(body).map_err(|e| AuthError::NetworkUnavailable(format!("unreadable firebase response: {e}")))
}

// =============================================================================
// BACKEND
// =============================================================================

struct FirebaseBackend {
    http: reqwest::Client,
    api_key: String,
    auth_base_url: String,
    token_base_url: String,
    default_admin_email: String,
}

impl FirebaseBackend {
    fn accounts_url(&self, method: &str) -> String {
        format!("{}/accounts:{method}?key={}", self.auth_base_url, self.api_key)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<String, AuthError> {
        let resp = self.http.post(url).json(body).send().await.map_err(|e| transport_error(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(&e))?;
        if status.is_success() { Ok(text) } else { Err(classify_error(status, &text)) }
    }

    async fn password_call(&self, method: &str, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let body = self
            .post_json(&self.accounts_url(method), &PasswordRequest { email, password, return_secure_token: true })
            .await?;
        let resp: PasswordResponse = parse_success(&body)?;
        Ok(SignedIn {
            identity: Identity::new(
                resp.local_id,
                display_name(resp.display_name, resp.email),
                Credential::new(resp.id_token),
            ),
            refresh_token: resp.refresh_token,
        })
    }

    async fn lookup(&self, credential: Credential) -> Result<Identity, AuthError> {
        let body = self
            .post_json(&self.accounts_url("lookup"), &LookupRequest { id_token: credential.expose() })
            .await?;
        let resp: LookupResponse = parse_success(&body)?;
        let user = resp.users.into_iter().next().ok_or(AuthError::InvalidCredentials)?;
        Ok(Identity::new(user.local_id, display_name(user.display_name, user.email), credential))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(Credential, String), AuthError> {
        let url = format!("{}/token?key={}", self.token_base_url, self.api_key);
        let resp = self
            .http
            .post(url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            return Err(classify_error(status, &text));
        }
        let resp: RefreshResponse = parse_success(&text)?;
        Ok((Credential::new(resp.id_token), resp.refresh_token))
    }

    /// Validate a persisted session, renewing an expired ID token once.
    async fn restore(&self, session: PersistedSession, refresh_token: Option<String>) -> Result<SignedIn, AuthError> {
        match self.lookup(session.token).await {
            Ok(identity) => Ok(SignedIn { identity, refresh_token }),
            Err(AuthError::InvalidCredentials) => {
                let Some(refresh_token) = refresh_token else {
                    return Err(AuthError::InvalidCredentials);
                };
                tracing::debug!(provider = PROVIDER, "id token rejected; renewing");
                let (credential, refresh_token) = self.refresh(&refresh_token).await?;
                let identity = self.lookup(credential).await?;
                Ok(SignedIn { identity, refresh_token: Some(refresh_token) })
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

struct FirebaseInner {
    backend: Option<FirebaseBackend>,
    tokens: Arc<TokenStore>,
    core: ProviderCore,
}

impl FirebaseInner {
    fn persist(&self, signed_in: &SignedIn) {
        persist_or_warn(self.tokens.save_session(&signed_in.identity), "store session");
        if let Some(refresh_token) = &signed_in.refresh_token {
            persist_or_warn(self.tokens.set(ADMIN_REFRESH_TOKEN_KEY, refresh_token), "store refresh token");
        }
    }
}

/// Adapter for the managed Firebase auth service.
pub struct FirebaseIdentityProvider {
    inner: Arc<FirebaseInner>,
}

impl FirebaseIdentityProvider {
    /// Build the adapter. A missing API key yields an adapter that reports
    /// `ProviderUnconfigured`.
    #[must_use]
    pub fn new(config: &FirebaseConfig, tokens: Arc<TokenStore>) -> Self {
        if config.project_id.is_none() {
            tracing::debug!(provider = PROVIDER, "FIREBASE_PROJECT_ID not set");
        }
        let backend = match &config.api_key {
            Some(api_key) => build_http_client(config.timeout).map(|http| FirebaseBackend {
                http,
                api_key: api_key.clone(),
                auth_base_url: config.auth_base_url.clone(),
                token_base_url: config.token_base_url.clone(),
                default_admin_email: config.default_admin_email.clone(),
            }),
            None => Err(AuthError::ProviderUnconfigured("FIREBASE_API_KEY is not set".to_owned())),
        };
        let (backend, core) = match backend {
            Ok(backend) => (Some(backend), ProviderCore::new()),
            Err(e) => {
                let determination = Determination::failed(e);
                log_determination(PROVIDER, &determination);
                (None, ProviderCore::settled(determination))
            }
        };
        Self { inner: Arc::new(FirebaseInner { backend, tokens, core }) }
    }

    fn backend(&self) -> Result<&FirebaseBackend, AuthError> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| AuthError::ProviderUnconfigured("FIREBASE_API_KEY is not set".to_owned()))
    }

    /// Create a new admin account. Like the browser SDK, the new account is
    /// signed in on success.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for an existing email or weak password,
    /// `ProviderUnconfigured` when sign-up is disabled for the project.
    pub async fn register(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let backend = self.backend()?;
        let signed_in = backend.password_call("signUp", email.trim(), password).await.inspect_err(|e| {
            tracing::warn!(provider = PROVIDER, error = %e, code = e.error_code(), "registration failed");
        })?;
        self.inner.core.publish_with(|| {
            self.inner.persist(&signed_in);
            Determination::signed_in(signed_in.identity.clone())
        });
        tracing::info!(provider = PROVIDER, user_id = %signed_in.identity.id, "admin registered");
        Ok(signed_in.identity)
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
        let refresh_token = self.inner.tokens.get(ADMIN_REFRESH_TOKEN_KEY).ok().flatten();

        let epoch = self.inner.core.epoch();
        let inner = Arc::clone(&self.inner);
        spawn_initial_check(&self.inner.core, async move {
            let Some(backend) = inner.backend.as_ref() else {
                return;
            };
            let outcome = backend.restore(session, refresh_token).await;
            let applied = inner.core.publish_if_current(epoch, || {
                let determination = match outcome {
                    Ok(signed_in) => {
                        inner.persist(&signed_in);
                        Determination::signed_in(signed_in.identity)
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
impl IdentityProvider for FirebaseIdentityProvider {
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
        let email = resolve_email(&credentials.identifier, &backend.default_admin_email);
        let signed_in = backend
            .password_call("signInWithPassword", &email, &credentials.secret)
            .await
            .inspect_err(|e| {
                tracing::warn!(provider = PROVIDER, error = %e, code = e.error_code(), "sign-in failed");
            })?;
        self.inner.core.publish_with(|| {
            self.inner.persist(&signed_in);
            Determination::signed_in(signed_in.identity.clone())
        });
        tracing::info!(provider = PROVIDER, user_id = %signed_in.identity.id, "signed in");
        Ok(signed_in.identity)
    }

    /// Firebase sessions are client-held; signing out forgets the tokens.
    async fn sign_out(&self) -> Result<(), AuthError> {
        self.backend()?;
        self.inner.core.publish_with(|| {
            persist_or_warn(self.inner.tokens.clear_session(), "clear session");
            Determination::signed_out()
        });
        tracing::info!(provider = PROVIDER, "signed out");
        Ok(())
    }
}

#[cfg(test)]
#[path = "firebase_test.rs"]
mod tests;
