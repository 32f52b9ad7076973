//! CyberMart Core - shared data structures and infrastructure
//!
//! Holds the error taxonomy, configuration, logging setup, domain types and the
//! key-value storage contract used by the API client and the session manager.

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use storage::*;
pub use types::*;

// Re-export commonly used external types
pub use tracing;
