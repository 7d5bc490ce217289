//! Errors raised by the question graph itself.
//!
//! Agent failures never appear here; nodes convert them into state fields.

use thiserror::Error;

use crate::agents::ValidationStatus;

/// Errors that abort a graph run.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The request failed validation before the run started.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// More node executions than the configured limit.
    #[error("Graph exceeded {limit} node executions")]
    StepLimitExceeded { limit: usize },

    /// A node tried to move an image status backwards.
    #[error("Illegal image status transition for question {index}: {from} -> {to}")]
    IllegalTransition {
        index: usize,
        from: ValidationStatus,
        to: ValidationStatus,
    },

    /// A node update broke a state invariant.
    #[error("Invalid state update from {node}: {reason}")]
    InvalidUpdate { node: &'static str, reason: String },

    /// The outcome could not be serialized for the progress stream.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
