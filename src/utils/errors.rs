// src/utils/errors.rs
//! Error taxonomy for reference operations
//!
//! Validation and authorization errors surface synchronously to the caller.
//! Task and action failures are stored and surface only where they are
//! observed (`deref`, `Agent::error`), so every variant is `Clone`: one cached
//! failure is handed to every observer verbatim.

use crate::runtime::sandbox::Operation;
use std::any::Any;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RefError>;

/// Errors raised by reference types, pools and agents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    /// A validator refused the candidate value
    #[error("Invalid reference state")]
    ValidationRejected,

    /// Raised by user code (a swap function, task body or agent action)
    #[error("{0}")]
    Failure(String),

    /// User code panicked; the payload message is preserved when it is a string
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The future was cancelled before it produced a value
    #[error("Future was cancelled")]
    Cancelled,

    /// The waiting thread was interrupted
    #[error("Interrupted while waiting")]
    Interrupted,

    /// The authorizer rejected the operation before any work was started
    #[error("Authorization denied for {operation}: {reason}")]
    AuthorizationDenied { operation: Operation, reason: String },

    /// The agent is failed and must be restarted before it accepts actions
    #[error("Agent is failed, needs restart: {0}")]
    AgentFailed(Box<RefError>),

    /// `restart` was called on an agent that is not failed
    #[error("Agent does not need a restart")]
    AgentNotFailed,

    /// `await` was called from inside an agent action
    #[error("Can't await in agent action")]
    AwaitInAction,

    /// The worker pool no longer accepts submissions
    #[error("Worker pool '{pool}' is shut down")]
    PoolShutdown { pool: String },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// An OS-level failure (thread spawn)
    #[error("I/O error: {0}")]
    Io(String),
}

impl RefError {
    /// Build a user-level failure
    pub fn failure(message: impl Into<String>) -> Self {
        RefError::Failure(message.into())
    }

    /// Convert a caught panic payload into an error
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        RefError::Panicked(message)
    }

    /// Security-relevant errors are never wrapped by the layers above
    pub fn is_security(&self) -> bool {
        matches!(self, RefError::AuthorizationDenied { .. })
    }
}

impl From<config::ConfigError> for RefError {
    fn from(err: config::ConfigError) -> Self {
        RefError::Config(err.to_string())
    }
}

impl From<std::io::Error> for RefError {
    fn from(err: std::io::Error) -> Self {
        RefError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_conversion() {
        let err = RefError::from_panic(Box::new("boom"));
        assert_eq!(err, RefError::Panicked("boom".to_string()));

        let err = RefError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err, RefError::Panicked("owned".to_string()));

        let err = RefError::from_panic(Box::new(42_u32));
        assert!(matches!(err, RefError::Panicked(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(RefError::failure("bad input").to_string(), "bad input");
        let denied = RefError::AuthorizationDenied {
            operation: Operation::SubmitFuture,
            reason: "no".to_string(),
        };
        assert!(denied.is_security());
        assert!(denied.to_string().contains("submit-future"));
        assert!(!RefError::Cancelled.is_security());
    }
}
