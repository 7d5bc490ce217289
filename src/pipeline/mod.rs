//! Orchestration of question generation runs.
//!
//! # Architecture
//!
//! - **Graph**: [`QuestionGraph`] sequences the agents and routes between them
//! - **State**: [`OrchestrationState`] plus the typed [`NodeUpdate`] merge
//! - **Progress**: ordered events from the run to a streaming consumer
//! - **Runner**: runs a graph on a background task and persists the batch
//! - **Config**: thresholds, retry ceilings and provider settings
//! - **Remediation**: regenerates one image of a saved batch on request
//!
//! # Run Flow
//!
//! 1. **Search** (optional): fetch authentic source texts
//! 2. **Generate**: draft the question batch, using feedback on retries
//! 3. **Review**: score the batch; regenerate below the threshold while attempts remain
//! 4. **Images** (required mode only): generate, validate and regenerate rejected images
//! 5. **Finish**: return every question with its image status flags
//!
//! # Example
//!
//! ```rust,ignore
//! use quizforge::pipeline::{PipelineConfig, QuestionGraph};
//! use quizforge::agents::GenerationRequest;
//!
//! let config = PipelineConfig::from_env()?;
//! let graph = QuestionGraph::from_config(&config, llm, Some(image), Some(vision), None);
//!
//! let request = GenerationRequest::new("D1 - Localizar informações explícitas", "2", "5")
//!     .with_count_questions(3);
//! let outcome = graph.run(request).await?;
//!
//! println!("score {:.2} after {} attempts", outcome.quality_score, outcome.retry_count);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod progress;
pub mod remediation;
pub mod result;
pub mod runner;
pub mod state;

pub use config::{ConfigError, PipelineConfig};
pub use error::GraphError;
pub use graph::{
    route_after_image_validation, route_after_review, route_on_image, route_start, QuestionGraph,
    DEFAULT_MAX_STEPS,
};
pub use progress::{
    progress_channel, ProgressEnvelope, ProgressEvent, ProgressReporter, ProgressStream,
};
pub use remediation::{regenerate_stored_image, ImageRemediation, RemediationError};
pub use result::{FinalQuestion, GenerationOutcome, GraphNode, GraphPhase};
pub use runner::{join_run, spawn_generation, GenerationHandle, RunError, RunReport};
pub use state::{NodeUpdate, OrchestrationState};
