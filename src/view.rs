//! Presentation-agnostic protected view.
//!
//! Polls the session gate on behalf of whatever renders the admin panel (the
//! CLI here). The view owns the "time since pending began" measurement: the
//! clock starts the first time it observes `Unresolved`.

use std::sync::Arc;
use std::time::Duration;

use gate::{GateDecision, GateOutcome, Identity, SessionState, decide};
use tokio::time::Instant;

use crate::store::SessionStore;

/// What the surface should show for one poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewAction {
    /// Show the waiting affordance; offer "continue anyway" when asked to.
    Waiting { offer_override: bool },
    /// Send the operator to the login page.
    RedirectToLogin { path: String },
    /// Render the protected content for `identity`.
    Render { identity: Identity },
}

pub struct ProtectedView {
    store: Arc<SessionStore>,
    pending_threshold: Duration,
    login_path: String,
    pending_since: Option<Instant>,
}

impl ProtectedView {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, pending_threshold: Duration, login_path: impl Into<String>) -> Self {
        Self { store, pending_threshold, login_path: login_path.into(), pending_since: None }
    }

    /// Gate outcome at `now`.
    pub fn outcome(&mut self, now: Instant) -> GateOutcome {
        let state = self.store.current();
        decide(&state, self.time_since_pending(&state, now), self.pending_threshold)
    }

    /// Decide what to show at `now`.
    pub fn poll(&mut self, now: Instant) -> ViewAction {
        let state = self.store.current();
        let outcome = decide(&state, self.time_since_pending(&state, now), self.pending_threshold);
        match (outcome.decision, state) {
            (GateDecision::Granted, SessionState::Resolved(Some(identity))) => ViewAction::Render { identity },
            (GateDecision::Pending, _) => ViewAction::Waiting { offer_override: outcome.show_override_prompt },
            _ => ViewAction::RedirectToLogin { path: self.login_path.clone() },
        }
    }

    /// The operator's explicit "continue anyway". Only acts while pending;
    /// the result is a denial, never access.
    pub fn continue_anyway(&self) -> bool {
        self.store.override_resolution()
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn time_since_pending(&mut self, state: &SessionState, now: Instant) -> Duration {
        if !state.is_unresolved() {
            return Duration::ZERO;
        }
        let since = *self.pending_since.get_or_insert(now);
        now.saturating_duration_since(since)
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
