//! Unified error handling system
//!
//! Structured error types for the storefront client. Every remote failure is either a
//! transport failure or a server response carrying its status; local failures cover
//! storage, configuration and decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub type StoreResult<T> = Result<T, StoreError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error context providing additional information for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the CyberMart client
#[derive(Error, Debug)]
pub enum StoreError {
    /// The request never produced a response (unreachable host, reset connection)
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    /// The server answered with a non-2xx status
    #[error("Server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    /// A persisted token was rejected while restoring the session
    #[error("Invalid session: {message}")]
    InvalidSession {
        message: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    /// A successful response body did not have the expected shape
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<BoxedSource>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            StoreError::Transport { context, .. } => Some(context),
            StoreError::Server { context, .. } => Some(context),
            StoreError::InvalidSession { context, .. } => Some(context),
            StoreError::Storage { context, .. } => Some(context),
            StoreError::Config { context, .. } => Some(context),
            StoreError::Decode { context, .. } => Some(context),
            StoreError::Io(_) | StoreError::Serialization(_) => None,
        }
    }

    /// HTTP status of a server error
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server refused the credentials attached to the request.
    ///
    /// A 403 is an authenticated caller without the right, not a bad credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Check if the same call could succeed later without any change on our side.
    ///
    /// Informational only: nothing in the client retries.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::Transport { .. } => true,
            StoreError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            StoreError::Transport { .. } => {
                warn!(error_id = ?error_id, error = %self, "Transport error (server unreachable)");
            }
            StoreError::Server { status, .. } if *status < 500 => {
                warn!(error_id = ?error_id, error = %self, "Request rejected by server");
            }
            StoreError::InvalidSession { .. } => {
                warn!(error_id = ?error_id, error = %self, "Persisted session rejected");
            }
            StoreError::Config { .. } => {
                error!(error_id = ?error_id, error = %self, "Configuration error");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::StoreError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'cybermart config init' to create a default config"),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::StoreError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::StoreError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}
