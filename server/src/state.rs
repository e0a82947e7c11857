//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the configured admin account and the live session table.

use std::sync::Arc;

use crate::config::{AdminAccount, ServerConfig};
use crate::services::session::{SessionTable, SessionUser};

#[derive(Clone)]
pub struct AppState {
    pub account: Arc<AdminAccount>,
    pub sessions: Arc<SessionTable>,
}

impl AppState {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            account: Arc::new(config.account.clone()),
            sessions: Arc::new(SessionTable::new(config.session_ttl)),
        }
    }

    /// Session user record for the configured admin.
    #[must_use]
    pub fn admin_user(&self) -> SessionUser {
        SessionUser { id: self.account.id.clone(), name: self.account.display_name.clone() }
    }
}
