//! Persistence of finished question batches.
//!
//! The graph does not depend on any storage schema. A finished run hands its
//! [`GenerationOutcome`] and [`RunMetadata`] to a [`BatchStore`], which returns
//! the identifiers it created.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quizforge::storage::{BatchStore, JsonFileStore, RunMetadata};
//!
//! let store = JsonFileStore::new("./output");
//! let saved = store.save_batch(&outcome, &RunMetadata::from_run(&request, &outcome)).await?;
//! println!("batch {} with {} questions", saved.group_id, saved.question_ids.len());
//! ```

pub mod json_store;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::{EvaluationModel, GenerationRequest, ImageDependency};
use crate::pipeline::GenerationOutcome;

pub use json_store::{BatchRecord, JsonFileStore, StoredQuestion};

/// Errors that can occur while persisting a batch.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Batch record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage directory creation failed.
    #[error("Failed to create storage directory: {0}")]
    DirectoryCreationFailed(String),

    /// No batch with this group id.
    #[error("Batch not found: {0}")]
    NotFound(Uuid),
}

/// Run facts stored alongside the questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub skill: String,
    pub proficiency_level: String,
    pub grade: String,
    pub curriculum_component: String,
    pub evaluation_model: EvaluationModel,
    pub image_dependency: ImageDependency,
    pub count_questions: u32,
    pub processing_time_ms: u64,
    pub quality_score: f64,
    pub retry_count: u32,
    pub image_retry_count: u32,
}

impl RunMetadata {
    /// Collects the metadata of a finished run.
    pub fn from_run(request: &GenerationRequest, outcome: &GenerationOutcome) -> Self {
        Self {
            skill: request.skill.clone(),
            proficiency_level: request.proficiency_level.clone(),
            grade: request.grade.clone(),
            curriculum_component: request.curriculum_component.clone(),
            evaluation_model: request.evaluation_model,
            image_dependency: request.image_dependency,
            count_questions: request.count_questions,
            processing_time_ms: outcome.elapsed.as_millis() as u64,
            quality_score: outcome.quality_score,
            retry_count: outcome.retry_count,
            image_retry_count: outcome.image_retry_count,
        }
    }
}

/// Identifiers created for a saved batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedBatch {
    /// Identifier shared by every question of the batch.
    pub group_id: Uuid,
    /// One identifier per question, in batch order.
    pub question_ids: Vec<Uuid>,
    /// Where the batch was written.
    pub location: PathBuf,
    /// Number of image files written.
    pub images_written: usize,
}

/// Destination for finished batches.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Persists a batch and returns the identifiers it created.
    async fn save_batch(
        &self,
        outcome: &GenerationOutcome,
        metadata: &RunMetadata,
    ) -> Result<SavedBatch, StorageError>;
}
