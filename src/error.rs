//! Error types for the nPod mutation client
//!
//! Provides structured error types for every stage of a mutation that
//! touches on-premises infrastructure: pre-flight validation, token
//! delivery, and recipe completion tracking.

use crate::recipe::RecipeState;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the mutation client
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Pre-flight Errors
    // =========================================================================
    #[error("{0}")]
    Validation(String),

    // =========================================================================
    // Token Delivery Errors
    // =========================================================================
    #[error("Token delivery failed: {0}")]
    TokenDelivery(String),

    // =========================================================================
    // Recipe Completion Errors
    // =========================================================================
    #[error("{operation} {}: {status}", failure_verb(.state))]
    RecipeFailed {
        operation: String,
        state: RecipeState,
        status: String,
    },

    #[error("{operation} timed out after {}s", .elapsed.as_secs())]
    LocalTimeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("{0}")]
    AggregateBatch(String),

    #[error("{operation} wait was cancelled")]
    Cancelled { operation: String },

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn failure_verb(state: &RecipeState) -> &'static str {
    match state {
        RecipeState::Timeout => "timeout",
        RecipeState::Cancelled => "cancelled",
        _ => "failed",
    }
}

impl Error {
    /// Build a decode error for the named wire type
    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error came from the transport rather than the protocol
    ///
    /// Transient errors leave the mutation in an unknown state; a caller may
    /// choose to query the recipe again. Nothing in this crate retries them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ControlPlane(_) | Error::Http(_) | Error::Io(_))
    }

    /// Check if the control plane reported a terminal non-success state
    pub fn is_terminal_recipe_failure(&self) -> bool {
        matches!(self, Error::RecipeFailed { .. })
    }
}

/// Result type alias for the mutation client
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_failure_messages() {
        let err = Error::RecipeFailed {
            operation: "createNPod".into(),
            state: RecipeState::Failed,
            status: "spu offline".into(),
        };
        assert_eq!(err.to_string(), "createNPod failed: spu offline");

        let err = Error::RecipeFailed {
            operation: "createNPod".into(),
            state: RecipeState::Timeout,
            status: "no heartbeat".into(),
        };
        assert_eq!(err.to_string(), "createNPod timeout: no heartbeat");

        let err = Error::RecipeFailed {
            operation: "deleteLomCredentials".into(),
            state: RecipeState::Cancelled,
            status: "by user".into(),
        };
        assert_eq!(err.to_string(), "deleteLomCredentials cancelled: by user");
    }

    #[test]
    fn test_error_classification() {
        let transient = Error::ControlPlane("502 bad gateway".into());
        assert!(transient.is_transient());
        assert!(!transient.is_terminal_recipe_failure());

        let failed = Error::RecipeFailed {
            operation: "op".into(),
            state: RecipeState::Failed,
            status: String::new(),
        };
        assert!(!failed.is_transient());
        assert!(failed.is_terminal_recipe_failure());

        let timeout = Error::LocalTimeout {
            operation: "op".into(),
            elapsed: Duration::from_secs(2700),
        };
        assert!(!timeout.is_transient());
        assert_eq!(timeout.to_string(), "op timed out after 2700s");
    }
}
