//! CyberMart Session - authentication session lifecycle
//!
//! The [`SessionManager`] is the only writer of the persisted token. It owns the
//! current [`Session`], publishes every change to subscribers, and restores the
//! session at startup. [`AuthorizationView`] is derived from a session on demand.

pub mod authorization;
pub mod manager;
pub mod session;

pub use authorization::AuthorizationView;
pub use manager::{HydrationOutcome, SessionManager};
pub use session::{Session, SessionState};
