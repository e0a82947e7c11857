//! Session store: sole owner of the admin session resolution state.
//!
//! DESIGN
//! ======
//! The store subscribes once to an [`IdentityProvider`] and folds each
//! determination into a [`SessionState`] through the pure
//! [`SessionState::apply`] rule, so `Unresolved` is never re-entered. Events
//! are applied in the order they are received; when a sign-out and a late
//! provider callback race, whichever arrives last wins.
//!
//! A bounded resolve timer runs from construction. If the provider has not
//! answered when it fires, the store logs a warning and records that the
//! bound elapsed. It never resolves on its own: the only ways out of
//! `Unresolved` are a provider answer or an explicit operator override.
//!
//! LIFECYCLE
//! =========
//! `dispose()` (or drop) cancels the timer, releases the provider
//! subscription, and forgets every change listener, once. Provider callbacks
//! that still arrive afterwards are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use gate::{AuthError, SessionEvent, SessionState};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::identity::{Determination, IdentityListener, IdentityProvider};
use crate::subscription::{Listener, ListenerSet, Subscription};

/// Why the session is in its current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    Unresolved,
    SignedIn,
    SignedOut,
    CredentialRejected,
    ProviderUnreachable,
    ProviderUnconfigured,
    Overridden,
}

impl Diagnosis {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::CredentialRejected => "credential_rejected",
            Self::ProviderUnreachable => "provider_unreachable",
            Self::ProviderUnconfigured => "provider_unconfigured",
            Self::Overridden => "overridden",
        }
    }

    fn of(state: &SessionState, last_error: Option<&AuthError>) -> Self {
        match (state, last_error) {
            (SessionState::Unresolved, _) => Self::Unresolved,
            (SessionState::Overridden, _) => Self::Overridden,
            (SessionState::Resolved(Some(_)), _) => Self::SignedIn,
            (SessionState::Resolved(None), None) => Self::SignedOut,
            (SessionState::Resolved(None), Some(AuthError::InvalidCredentials)) => Self::CredentialRejected,
            (SessionState::Resolved(None), Some(AuthError::NetworkUnavailable(_))) => Self::ProviderUnreachable,
            (SessionState::Resolved(None), Some(AuthError::ProviderUnconfigured(_))) => Self::ProviderUnconfigured,
        }
    }
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SessionListener = Listener<SessionState>;

#[derive(Default)]
struct Snapshot {
    state: SessionState,
    last_error: Option<AuthError>,
}

struct StoreInner {
    snapshot: Mutex<Snapshot>,
    listeners: ListenerSet<SessionState>,
    provider_subscription: Mutex<Option<Subscription>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    bound_elapsed: AtomicBool,
}

impl StoreInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            timer.abort();
        }
    }

    fn on_determination(&self, determination: &Determination) {
        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!("provider callback after dispose discarded");
            return;
        }
        let changed = {
            let mut snapshot = self.lock();
            snapshot.last_error.clone_from(&determination.error);
            transition(&mut snapshot, SessionEvent::ProviderReported(determination.identity.clone()))
        };
        self.cancel_timer();
        if let Some(state) = changed {
            self.listeners.notify(&state);
        }
    }

    fn on_bound_elapsed(&self, bound: Duration) {
        if self.disposed.load(Ordering::SeqCst) || !self.lock().state.is_unresolved() {
            return;
        }
        self.bound_elapsed.store(true, Ordering::SeqCst);
        tracing::warn!(
            bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
            "identity provider has not answered; session still unresolved"
        );
    }
}

/// Apply `event` to `snapshot`; returns the new state when it changed.
fn transition(snapshot: &mut Snapshot, event: SessionEvent) -> Option<SessionState> {
    let next = snapshot.state.apply(event).filter(|next| *next != snapshot.state)?;
    tracing::info!(
        from = snapshot.state.tag(),
        to = next.tag(),
        diagnosis = %Diagnosis::of(&next, snapshot.last_error.as_ref()),
        "session state changed"
    );
    snapshot.state = next.clone();
    Some(next)
}

/// Owner of the current [`SessionState`].
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Start `Unresolved`, arm the resolve timer, and subscribe to `provider`.
    ///
    /// The provider may answer synchronously from `subscribe`, in which case
    /// the store is already resolved when this returns. Outside a tokio
    /// runtime no timer is armed.
    #[must_use]
    pub fn new(provider: &dyn IdentityProvider, resolve_bound: Duration) -> Self {
        let inner = Arc::new(StoreInner {
            snapshot: Mutex::new(Snapshot::default()),
            listeners: ListenerSet::new(),
            provider_subscription: Mutex::new(None),
            timer: Mutex::new(None),
            disposed: AtomicBool::new(false),
            bound_elapsed: AtomicBool::new(false),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&inner);
                let timer = handle.spawn(async move {
                    tokio::time::sleep(resolve_bound).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.on_bound_elapsed(resolve_bound);
                    }
                });
                *inner.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
            }
            Err(_) => tracing::debug!("no async runtime; resolve timer not armed"),
        }

        let weak: Weak<StoreInner> = Arc::downgrade(&inner);
        let listener: IdentityListener = Arc::new(move |determination: &Determination| match weak.upgrade() {
            Some(inner) => inner.on_determination(determination),
            None => tracing::debug!("provider callback after dispose discarded"),
        });
        let subscription = provider.subscribe(listener);
        *inner.provider_subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        Self { inner }
    }

    #[must_use]
    pub fn current(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Error attached to the latest provider determination, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<AuthError> {
        self.inner.lock().last_error.clone()
    }

    #[must_use]
    pub fn diagnosis(&self) -> Diagnosis {
        let snapshot = self.inner.lock();
        Diagnosis::of(&snapshot.state, snapshot.last_error.as_ref())
    }

    /// Whether the resolve timer fired while the session was still unresolved.
    #[must_use]
    pub fn resolve_bound_elapsed(&self) -> bool {
        self.inner.bound_elapsed.load(Ordering::SeqCst)
    }

    /// Register `listener` for every applied transition. No replay of the
    /// current state.
    pub fn on_change(&self, listener: SessionListener) -> Subscription {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Subscription::detached();
        }
        self.inner.listeners.add(listener)
    }

    /// Stop waiting on the provider: `Unresolved` becomes `Overridden`.
    /// Returns `false` (and changes nothing) in any other state.
    pub fn override_resolution(&self) -> bool {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let Some(state) = transition(&mut self.inner.lock(), SessionEvent::Override) else {
            tracing::debug!("override ignored; session already resolved");
            return false;
        };
        tracing::warn!("session resolution overridden by operator; access stays denied");
        self.inner.cancel_timer();
        self.inner.listeners.notify(&state);
        true
    }

    /// Release the provider subscription, the timer, and all listeners.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel_timer();
        let subscription = self.inner.provider_subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner.listeners.clear();
        tracing::debug!("session store disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
