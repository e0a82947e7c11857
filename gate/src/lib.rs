//! Session gating model shared by the admin client and its identity adapters.
//!
//! This crate is runtime agnostic: it owns the session state machine, the
//! auth error taxonomy, and the pure [`decide`] function that maps a session
//! state to a render decision. Timers, subscriptions, and I/O live in the
//! crates that consume it.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Opaque bearer credential issued by an identity backend.
///
/// `Debug` and `Display` never print the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for attaching as `Authorization: Bearer <token>` or persisting.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Ready-made `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Identifier + secret submitted to `sign_in`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), secret: secret.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// An authenticated principal as reported by an identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Backend-assigned identifier.
    pub id: String,
    /// Human-readable name, when the backend knows one.
    pub display_name: Option<String>,
    /// Credential to attach to authorized requests.
    pub credential: Credential,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: Option<String>, credential: Credential) -> Self {
        Self { id: id.into(), display_name, credential }
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure reported by an identity provider.
///
/// `ProviderUnconfigured` is an operator fault and must never be shown to a
/// user as "wrong password".
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The backend rejected the identifier/secret or the presented token.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The backend could not be reached or failed transiently.
    #[error("identity backend unavailable: {0}")]
    NetworkUnavailable(String),

    /// The adapter has no usable backend configuration.
    #[error("identity provider unconfigured: {0}")]
    ProviderUnconfigured(String),
}

/// Stable machine-readable code for an error, plus whether retrying the same
/// request may succeed.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::NetworkUnavailable(_) => "E_NETWORK_UNAVAILABLE",
            Self::ProviderUnconfigured(_) => "E_PROVIDER_UNCONFIGURED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}

impl AuthError {
    /// Message suitable for a login form.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password.",
            Self::NetworkUnavailable(_) => "Cannot reach the sign-in service. Check your connection and try again.",
            Self::ProviderUnconfigured(_) => "Sign-in is not available right now. Contact the site administrator.",
        }
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Resolution state of the current session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No determination has been made yet.
    #[default]
    Unresolved,
    /// The provider reported an identity, or definitively reported none.
    Resolved(Option<Identity>),
    /// An operator stopped waiting on the provider. Authorizes like `Resolved(None)`.
    Overridden,
}

/// Input to [`SessionState::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The provider delivered a determination.
    ProviderReported(Option<Identity>),
    /// An operator asked to stop waiting.
    Override,
}

impl SessionState {
    /// Compute the successor state for `event`, or `None` when the event must
    /// not change the state.
    ///
    /// Provider reports always win. An override only moves `Unresolved`
    /// forward; nothing ever leads back to `Unresolved`.
    #[must_use]
    pub fn apply(&self, event: SessionEvent) -> Option<SessionState> {
        match (self, event) {
            (_, SessionEvent::ProviderReported(identity)) => Some(SessionState::Resolved(identity)),
            (SessionState::Unresolved, SessionEvent::Override) => Some(SessionState::Overridden),
            (SessionState::Resolved(_) | SessionState::Overridden, SessionEvent::Override) => None,
        }
    }

    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }

    /// The resolved identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Resolved(identity) => identity.as_ref(),
            Self::Unresolved | Self::Overridden => None,
        }
    }

    /// Short tag for diagnostics and logs.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolved(Some(_)) => "resolved_identity",
            Self::Resolved(None) => "resolved_none",
            Self::Overridden => "overridden",
        }
    }
}

// =============================================================================
// GATE
// =============================================================================

/// Render decision for a protected view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Pending,
    Denied,
    Granted,
}

/// Output of [`decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub decision: GateDecision,
    /// Surface the manual "continue anyway" action to the operator.
    pub show_override_prompt: bool,
}

impl GateOutcome {
    const fn new(decision: GateDecision, show_override_prompt: bool) -> Self {
        Self { decision, show_override_prompt }
    }
}

/// Map a session state to a render decision.
///
/// `time_since_pending` is measured by the caller from the moment it first
/// observed `Unresolved`. Crossing `pending_threshold` only raises the
/// override prompt; it never turns `Pending` into `Denied`. `Overridden`
/// always decides `Denied`.
#[must_use]
pub fn decide(state: &SessionState, time_since_pending: Duration, pending_threshold: Duration) -> GateOutcome {
    match state {
        SessionState::Unresolved => {
            GateOutcome::new(GateDecision::Pending, time_since_pending >= pending_threshold)
        }
        SessionState::Resolved(None) | SessionState::Overridden => GateOutcome::new(GateDecision::Denied, false),
        SessionState::Resolved(Some(_)) => GateOutcome::new(GateDecision::Granted, false),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
