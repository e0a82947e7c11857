//! Admin session gate for the MIPL marketing site.
//!
//! Decides whether the admin panel may be shown by folding identity provider
//! answers into a session state and mapping that state through the pure gate
//! in the `gate` crate. Providers: a token-issuing REST backend or a Firebase
//! project.

pub mod config;
pub mod identity;
pub mod store;
pub mod subscription;
pub mod token_store;
pub mod view;

pub use gate::{
    AuthError, Credential, Credentials, ErrorCode, GateDecision, GateOutcome, Identity, SessionEvent, SessionState,
    decide,
};
pub use identity::{AdminIdentityProvider, Determination, IdentityProvider};
pub use store::{Diagnosis, SessionStore};
pub use view::{ProtectedView, ViewAction};
