//! File-based batch store.
//!
//! Each batch gets its own directory named after the group id:
//!
//! ```text
//! <base>/<group-id>/batch.json
//! <base>/<group-id>/question_1.png
//! <base>/<group-id>/question_3.png
//! ```
//!
//! A run writes only valid images; questions flagged for manual production
//! keep `image_file: null` in `batch.json`. An image regenerated on request
//! replaces `question_<n>.png` whatever its verdict, and the record keeps the
//! verdict next to it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BatchStore, RunMetadata, SavedBatch, StorageError};
use crate::agents::{QuestionDraft, ValidationStatus};
use crate::pipeline::GenerationOutcome;

/// File name of the batch record inside a group directory.
pub const BATCH_FILE: &str = "batch.json";

/// One stored question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: Uuid,
    #[serde(flatten)]
    pub draft: QuestionDraft,
    pub needs_manual_image: bool,
    pub image_validation_status: Option<ValidationStatus>,
    #[serde(default)]
    pub image_validation_issues: Vec<String>,
    /// Image file name relative to the batch directory.
    pub image_file: Option<String>,
}

/// Contents of `batch.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Set when a stored question was changed after the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: RunMetadata,
    pub questions: Vec<StoredQuestion>,
}

/// Batch store writing JSON records and PNG files under a base directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at `base_path`. Directories are created lazily.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Returns the base storage path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of one batch.
    pub fn batch_dir(&self, group_id: Uuid) -> PathBuf {
        self.base_path.join(group_id.to_string())
    }

    /// Reads a stored batch record back.
    pub async fn load_batch(&self, group_id: Uuid) -> Result<BatchRecord, StorageError> {
        let path = self.batch_dir(group_id).join(BATCH_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(group_id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads the image stored for `question`, if it has one on disk.
    pub async fn load_image(
        &self,
        group_id: Uuid,
        question: &StoredQuestion,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(name) = &question.image_file else {
            return Ok(None);
        };
        match fs::read(self.batch_dir(group_id).join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(group_id = %group_id, file = %name, "Recorded image is missing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `question_<n>.png` into an existing batch and returns its name.
    pub async fn write_question_image(
        &self,
        group_id: Uuid,
        question_number: usize,
        image: &[u8],
    ) -> Result<String, StorageError> {
        let dir = self.batch_dir(group_id);
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::NotFound(group_id));
        }
        let name = format!("question_{}.png", question_number);
        Self::write_file(&dir.join(&name), image).await?;
        Ok(name)
    }

    /// Rewrites `batch.json` of an existing batch.
    pub async fn write_record(&self, record: &BatchRecord) -> Result<(), StorageError> {
        let dir = self.batch_dir(record.group_id);
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::NotFound(record.group_id));
        }
        let json = serde_json::to_vec_pretty(record)?;
        Self::write_file(&dir.join(BATCH_FILE), &json).await
    }

    async fn write_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchStore for JsonFileStore {
    async fn save_batch(
        &self,
        outcome: &GenerationOutcome,
        metadata: &RunMetadata,
    ) -> Result<SavedBatch, StorageError> {
        let group_id = Uuid::new_v4();
        let dir = self.batch_dir(group_id);
        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::DirectoryCreationFailed(format!("{}: {}", dir.display(), e))
        })?;

        let mut questions = Vec::with_capacity(outcome.questions.len());
        let mut images_written = 0;

        for (idx, question) in outcome.questions.iter().enumerate() {
            let image = outcome
                .image_results
                .iter()
                .find(|r| r.question_index == idx && r.validation_status == ValidationStatus::Valid)
                .and_then(|r| r.image.as_deref());

            let image_file = match image {
                Some(bytes) => {
                    let name = format!("question_{}.png", idx + 1);
                    Self::write_file(&dir.join(&name), bytes).await?;
                    images_written += 1;
                    Some(name)
                }
                None => None,
            };

            questions.push(StoredQuestion {
                id: Uuid::new_v4(),
                draft: question.draft.clone(),
                needs_manual_image: question.needs_manual_image,
                image_validation_status: question.image_validation_status,
                image_validation_issues: question.image_validation_issues.clone(),
                image_file,
            });
        }

        let record = BatchRecord {
            group_id,
            created_at: Utc::now(),
            updated_at: None,
            metadata: metadata.clone(),
            questions,
        };
        let json = serde_json::to_vec_pretty(&record)?;
        Self::write_file(&dir.join(BATCH_FILE), &json).await?;

        tracing::info!(
            group_id = %group_id,
            questions = record.questions.len(),
            images_written,
            path = %dir.display(),
            "Batch saved"
        );

        Ok(SavedBatch {
            group_id,
            question_ids: record.questions.iter().map(|q| q.id).collect(),
            location: dir,
            images_written,
        })
    }
}
