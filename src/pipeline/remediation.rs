//! Regeneration of one stored image from user instructions.
//!
//! Works on a batch already written by [`JsonFileStore`]: the stored PNG is
//! edited when it exists and redrawn otherwise, then validated when a
//! validator is available. The new image replaces `question_<n>.png` and the
//! question's status flags are rewritten in `batch.json`.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::agents::{
    AgentError, ImageGeneratorAgent, ImageValidatorAgent, ImageVerdict, ValidationStatus,
};
use crate::storage::{JsonFileStore, StorageError, StoredQuestion};

/// Errors from regenerating a stored image.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// The batch could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The image provider failed.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// The batch has no question with this number.
    #[error("Batch {group_id} has no question {question_number}")]
    QuestionNotFound { group_id: Uuid, question_number: usize },

    #[error("Regeneration instructions must not be empty")]
    EmptyInstructions,
}

/// Result of regenerating one stored image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRemediation {
    pub group_id: Uuid,
    /// 1-based position of the question in the batch.
    pub question_number: usize,
    /// The question as now stored.
    pub question: StoredQuestion,
    /// Whether a stored image was used as the starting point.
    pub had_previous_image: bool,
    /// Validator verdict, absent when validation was skipped.
    pub verdict: Option<ImageVerdict>,
}

/// Regenerates the image of question `question_number` of a stored batch
/// following `instructions`.
///
/// Without a validator the new image is recorded as pending. An invalid
/// verdict still replaces the file but flags the question for manual
/// production.
///
/// # Errors
///
/// Returns `RemediationError::EmptyInstructions` before any provider call
/// when `instructions` is blank.
pub async fn regenerate_stored_image(
    store: &JsonFileStore,
    group_id: Uuid,
    question_number: usize,
    instructions: &str,
    generator: &ImageGeneratorAgent,
    validator: Option<&ImageValidatorAgent>,
) -> Result<ImageRemediation, RemediationError> {
    let instructions = instructions.trim();
    if instructions.is_empty() {
        return Err(RemediationError::EmptyInstructions);
    }

    let mut record = store.load_batch(group_id).await?;
    let index = question_number
        .checked_sub(1)
        .filter(|idx| *idx < record.questions.len())
        .ok_or(RemediationError::QuestionNotFound {
            group_id,
            question_number,
        })?;

    let previous = store.load_image(group_id, &record.questions[index]).await?;
    tracing::info!(
        group_id = %group_id,
        question_number,
        has_previous = previous.is_some(),
        "Regenerating stored image"
    );

    let draft = &record.questions[index].draft;
    let image = generator
        .regenerate(draft, instructions, previous.as_deref())
        .await?;

    let verdict = match validator {
        Some(validator) => Some(validator.validate(draft, &image).await),
        None => None,
    };
    let status = match &verdict {
        Some(verdict) if verdict.valid => ValidationStatus::Valid,
        Some(_) => ValidationStatus::Invalid,
        None => ValidationStatus::Pending,
    };

    let image_file = store
        .write_question_image(group_id, question_number, &image)
        .await?;

    let question = &mut record.questions[index];
    question.image_file = Some(image_file);
    question.image_validation_status = Some(status);
    question.image_validation_issues = verdict
        .as_ref()
        .map(|v| v.issues.clone())
        .unwrap_or_default();
    question.needs_manual_image = status == ValidationStatus::Invalid;
    record.updated_at = Some(Utc::now());
    store.write_record(&record).await?;

    tracing::info!(
        group_id = %group_id,
        question_number,
        status = ?status,
        bytes = image.len(),
        "Stored image replaced"
    );

    Ok(ImageRemediation {
        group_id,
        question_number,
        question: record.questions[index].clone(),
        had_previous_image: previous.is_some(),
        verdict,
    })
}
