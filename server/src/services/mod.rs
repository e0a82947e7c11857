//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own credential checks and session bookkeeping so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod credentials;
pub mod session;
