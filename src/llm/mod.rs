//! LLM integration for quizforge.
//!
//! Every agent talks to its provider through one of three traits:
//!
//! - [`LlmProvider`] for chat completions (generation, review, prompt engineering)
//! - [`ImageProvider`] for image generation and editing
//! - [`VisionProvider`] for multimodal image review
//!
//! Concrete clients ([`ChatClient`], [`GeminiClient`]) validate credentials at
//! construction and wrap each network call in a [`RetryPolicy`] that retries
//! only transient transport failures.
//!
//! ```ignore
//! use quizforge::llm::{ChatClient, CompletionRequest, LlmProvider, LlmSettings, Message};
//!
//! let client = ChatClient::from_env(LlmSettings::question_defaults())?;
//! let request = CompletionRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod client;
pub mod image;
pub mod retry;

pub use client::{
    ChatClient, ChatVendor, Choice, CompletionRequest, CompletionResponse, LlmProvider,
    LlmSettings, Message, Usage,
};
pub use image::{
    image_mime_type, AspectRatio, GeminiClient, ImageProvider, VisionProvider,
    DEFAULT_VISION_MODEL,
};
pub use retry::{RetryPolicy, TransientError};
