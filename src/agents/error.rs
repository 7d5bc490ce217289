//! Error types for the question-generation agents.
//!
//! Each agent surfaces its own failure kind so that the orchestration graph
//! can convert it into the matching state field at the node boundary.

use thiserror::Error;

/// Failures raised by the generation, review and image agents.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The generator produced no usable question batch.
    #[error("Question generation failed: {0}")]
    QuestionGeneration(String),

    /// A generated question violates the draft invariants.
    #[error("Invalid question {question_number}: {reason}")]
    InvalidQuestion { question_number: u32, reason: String },

    /// The reviewer call or its verdict failed.
    #[error("Quality review failed: {0}")]
    Review(String),

    /// The image provider failed to produce an image.
    #[error("Image generation failed: {0}")]
    ImageGeneration(String),

    /// The vision provider failed to review an image.
    #[error("Image validation failed: {0}")]
    ImageValidation(String),

    /// The source-text provider failed.
    #[error("Text search failed: {0}")]
    TextSearch(String),

    /// The chat provider call failed.
    #[error("LLM error: {0}")]
    LlmError(String),

    /// The reply could not be read as the expected structure.
    #[error("unreadable model reply: {0}")]
    ResponseParseError(String),

    /// Request parameters are unusable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("agent misconfigured: {0}")]
    ConfigurationError(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<crate::error::LlmError> for AgentError {
    fn from(err: crate::error::LlmError) -> Self {
        AgentError::LlmError(err.to_string())
    }
}

impl From<crate::error::ImageError> for AgentError {
    fn from(err: crate::error::ImageError) -> Self {
        AgentError::ImageGeneration(err.to_string())
    }
}

impl From<crate::error::SearchError> for AgentError {
    fn from(err: crate::error::SearchError) -> Self {
        AgentError::TextSearch(err.to_string())
    }
}

impl From<crate::utils::JsonExtractionError> for AgentError {
    fn from(err: crate::utils::JsonExtractionError) -> Self {
        AgentError::ResponseParseError(err.to_string())
    }
}

/// Shorthand for agent results.
pub type AgentResult<T> = Result<T, AgentError>;
