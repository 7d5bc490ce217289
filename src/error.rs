//! Error types for quizforge provider integrations.
//!
//! Defines the error types shared by the external collaborators the
//! orchestration depends on:
//! - Chat-completion providers (question generation, review, prompt engineering)
//! - Image generation and editing providers
//! - Multimodal vision providers
//! - Source-text search providers

use thiserror::Error;

/// Errors that can occur during LLM text operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("Unsupported model '{0}': no provider is registered for it")]
    UnsupportedModel(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while generating, editing or analyzing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("Invalid aspect ratio '{0}': expected one of 1:1, 9:16, 16:9, 3:4, 4:3")]
    InvalidAspectRatio(String),

    #[error("Image request failed: {0}")]
    RequestFailed(String),

    #[error("Image request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Image API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Provider returned no image data")]
    NoImageData,

    #[error("Provider returned no text content")]
    NoTextContent,

    #[error("Failed to decode image payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to parse image API response: {0}")]
    ParseError(String),
}

/// Errors that can occur while retrieving authentic source texts.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Source text provider unavailable: {0}")]
    Unavailable(String),

    #[error("Source text search failed: {0}")]
    RequestFailed(String),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}
