//! Identity provider adapters.
//!
//! DESIGN
//! ======
//! Every backend sits behind [`IdentityProvider`]: a listener-based
//! `subscribe` plus async `sign_in`/`sign_out`. Adapters never hold UI state;
//! they only publish [`Determination`]s. [`AdminIdentityProvider`] dispatches
//! to the REST or Firebase adapter based on `ADMIN_AUTH_PROVIDER`.
//!
//! ERROR HANDLING
//! ==============
//! An adapter without usable configuration still accepts `subscribe` and
//! answers immediately with `ProviderUnconfigured`, so nothing downstream
//! waits forever on a backend that will never answer.

pub mod firebase;
pub mod rest;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gate::{AuthError, Credentials, ErrorCode, Identity};

use crate::config::{AdminConfig, ProviderKind};
use crate::subscription::{Listener, ListenerSet, Subscription};
use crate::token_store::TokenStore;

pub use firebase::FirebaseIdentityProvider;
pub use rest::RestIdentityProvider;

// =============================================================================
// DETERMINATION
// =============================================================================

/// What a provider currently knows: an identity or none, plus the error that
/// explains a missing identity when there is one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Determination {
    pub identity: Option<Identity>,
    pub error: Option<AuthError>,
}

impl Determination {
    #[must_use]
    pub fn signed_in(identity: Identity) -> Self {
        Self { identity: Some(identity), error: None }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { identity: None, error: None }
    }

    #[must_use]
    pub fn failed(error: AuthError) -> Self {
        Self { identity: None, error: Some(error) }
    }
}

pub type IdentityListener = Listener<Determination>;

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Latest identity known to the adapter, without waiting on the backend.
    fn current_identity(&self) -> Option<Identity>;

    /// Register `listener`. It is invoked at least once with the current
    /// determination (immediately when one is known) and again on every
    /// change.
    fn subscribe(&self, listener: IdentityListener) -> Subscription;

    /// Authenticate. On success listeners observe the new identity before
    /// this returns.
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    /// End the session. On success listeners observe `None`.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

// =============================================================================
// SHARED ADAPTER CORE
// =============================================================================

/// Listener fan-out plus the latest determination, shared by adapters.
///
/// Publishing and the replay in `subscribe` run under one lock, so a new
/// listener never receives an older determination after a newer one. The
/// lock is held while listeners run: a listener must not publish to or
/// subscribe on the same core from inside its callback.
pub(crate) struct ProviderCore {
    listeners: ListenerSet<Determination>,
    latest: Mutex<Option<Determination>>,
    publishing: Mutex<()>,
    check_started: AtomicBool,
    publishes: AtomicU64,
}

impl ProviderCore {
    pub(crate) fn new() -> Self {
        Self {
            listeners: ListenerSet::new(),
            latest: Mutex::new(None),
            publishing: Mutex::new(()),
            check_started: AtomicBool::new(false),
            publishes: AtomicU64::new(0),
        }
    }

    /// A core that already knows its answer and never runs an initial check.
    pub(crate) fn settled(determination: Determination) -> Self {
        Self {
            listeners: ListenerSet::new(),
            latest: Mutex::new(Some(determination)),
            publishing: Mutex::new(()),
            check_started: AtomicBool::new(true),
            publishes: AtomicU64::new(1),
        }
    }

    pub(crate) fn latest(&self) -> Option<Determination> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn current_identity(&self) -> Option<Identity> {
        self.latest().and_then(|d| d.identity)
    }

    pub(crate) fn subscribe(&self, listener: IdentityListener) -> Subscription {
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        let subscription = self.listeners.add(Arc::clone(&listener));
        if let Some(determination) = self.latest() {
            listener(&determination);
        }
        subscription
    }

    /// Record and fan out a determination. Any published answer, including
    /// one from `sign_in`, makes a later initial check redundant.
    pub(crate) fn publish(&self, determination: Determination) {
        self.publish_with(|| determination);
    }

    /// Run `apply` (storage side effects that must not interleave with
    /// another publish) and publish the determination it returns.
    pub(crate) fn publish_with(&self, apply: impl FnOnce() -> Determination) {
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish_locked(apply());
    }

    /// Like [`Self::publish_with`], but only while nothing was published
    /// after `epoch`. Returns `false`, without running `apply`, when a
    /// sign-in or sign-out got there first.
    pub(crate) fn publish_if_current(&self, epoch: u64, apply: impl FnOnce() -> Determination) -> bool {
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(epoch) {
            return false;
        }
        self.publish_locked(apply());
        true
    }

    fn publish_locked(&self, determination: Determination) {
        self.check_started.store(true, Ordering::SeqCst);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(determination.clone());
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.listeners.notify(&determination);
    }

    /// Publish count, captured before a background check starts.
    pub(crate) fn epoch(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    /// `false` once anything was published after `epoch`; a background check
    /// that lost to an explicit sign-in or sign-out must not apply its result.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Returns `true` exactly once, for the caller that should run the
    /// initial determination.
    pub(crate) fn claim_initial_check(&self) -> bool {
        !self.check_started.swap(true, Ordering::SeqCst)
    }
}

/// Classify a transport-level failure.
pub(crate) fn transport_error(e: &reqwest::Error) -> AuthError {
    AuthError::NetworkUnavailable(e.to_string())
}

/// Build the HTTP client an adapter uses, or explain why it cannot.
pub(crate) fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| AuthError::ProviderUnconfigured(format!("http client build failed: {e}")))
}

/// Run `check` on the current tokio runtime, or publish an unconfigured
/// determination when called outside one.
pub(crate) fn spawn_initial_check<F>(core: &ProviderCore, check: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(check);
        }
        Err(_) => {
            tracing::error!("no async runtime available for session validation");
            core.publish(Determination::failed(AuthError::ProviderUnconfigured(
                "session validation requires an async runtime".to_owned(),
            )));
        }
    }
}

/// Log a provider determination at a level that tells operators apart from
/// users: an unconfigured provider is an error, a plain sign-out is routine.
pub(crate) fn log_determination(provider: &'static str, determination: &Determination) {
    match (&determination.identity, &determination.error) {
        (Some(identity), _) => tracing::info!(provider, user_id = %identity.id, "admin session active"),
        (None, None) => tracing::info!(provider, "no admin session"),
        (None, Some(e @ AuthError::ProviderUnconfigured(_))) => {
            tracing::error!(provider, error = %e, code = e.error_code(), "identity provider unconfigured; admin sign-in unavailable");
        }
        (None, Some(e)) => tracing::warn!(provider, error = %e, code = e.error_code(), "admin session not established"),
    }
}

/// Persisting is best effort: a failed write is logged, never fatal.
pub(crate) fn persist_or_warn(result: Result<(), crate::token_store::TokenStoreError>, action: &'static str) {
    if let Err(e) = result {
        tracing::warn!(error = %e, action, "session persistence failed");
    }
}

// =============================================================================
// CLIENT DISPATCH
// =============================================================================

/// Concrete adapter selected by configuration.
pub enum AdminIdentityProvider {
    Rest(RestIdentityProvider),
    Firebase(FirebaseIdentityProvider),
}

impl AdminIdentityProvider {
    #[must_use]
    pub fn from_config(config: &AdminConfig, tokens: Arc<TokenStore>) -> Self {
        match config.provider {
            ProviderKind::Rest => Self::Rest(RestIdentityProvider::new(&config.rest, tokens)),
            ProviderKind::Firebase => Self::Firebase(FirebaseIdentityProvider::new(&config.firebase, tokens)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rest(_) => "rest",
            Self::Firebase(_) => "firebase",
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for AdminIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        match self {
            Self::Rest(p) => p.current_identity(),
            Self::Firebase(p) => p.current_identity(),
        }
    }

    fn subscribe(&self, listener: IdentityListener) -> Subscription {
        match self {
            Self::Rest(p) => p.subscribe(listener),
            Self::Firebase(p) => p.subscribe(listener),
        }
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match self {
            Self::Rest(p) => p.sign_in(credentials).await,
            Self::Firebase(p) => p.sign_in(credentials).await,
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        match self {
            Self::Rest(p) => p.sign_out().await,
            Self::Firebase(p) => p.sign_out().await,
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
