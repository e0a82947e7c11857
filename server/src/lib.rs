//! REST identity backend for the MIPL admin panel.
//!
//! Issues bearer tokens for a single configured admin account and answers
//! token lookups and revocations. Sessions are held in memory.

pub mod config;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::app;
pub use state::AppState;
