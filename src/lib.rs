//! quizforge: multi-agent generation of multiple-choice assessment items.
//!
//! A [`pipeline::QuestionGraph`] drafts a batch of questions with an LLM,
//! reviews it against a pedagogical rubric, regenerates weak batches within a
//! bounded budget and, when the request requires images, generates and
//! validates one image per question. Progress is published as ordered events
//! that a consumer can stream while the run executes on a background task.

pub mod agents;
pub mod cli;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{ImageError, LlmError, SearchError};
