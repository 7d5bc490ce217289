//! Final result of a generation run.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::state::OrchestrationState;
use crate::agents::{ImageDependency, ImageResult, QuestionDraft, SourceText, ValidationStatus};

/// Nodes of the question graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Search,
    Generate,
    Review,
    ImageGenerate,
    ImageValidate,
    ImageRetry,
}

impl GraphNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Generate => "generate",
            Self::Review => "review",
            Self::ImageGenerate => "image_generate",
            Self::ImageValidate => "image_validate",
            Self::ImageRetry => "image_retry",
        }
    }

    /// Phase the graph is in while this node runs.
    pub fn phase(&self) -> GraphPhase {
        match self {
            Self::Search | Self::Generate => GraphPhase::Generating,
            Self::Review => GraphPhase::Reviewing,
            Self::ImageGenerate | Self::ImageRetry => GraphPhase::ImageGenerating,
            Self::ImageValidate => GraphPhase::ImageValidating,
        }
    }
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphPhase {
    Generating,
    Reviewing,
    ImageGenerating,
    ImageValidating,
    /// Finished with every quality bar met.
    Done,
    /// Finished with a sub-threshold score or images needing manual work.
    Degraded,
}

/// A question as handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalQuestion {
    #[serde(flatten)]
    pub draft: QuestionDraft,
    /// Base64 PNG when a valid image exists.
    pub image_base64: Option<String>,
    /// Whether the image must be produced by hand.
    pub needs_manual_image: bool,
    pub image_validation_status: Option<ValidationStatus>,
    pub image_validation_issues: Vec<String>,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub questions: Vec<FinalQuestion>,
    /// Last review score; 0.0 if the batch was never reviewed.
    pub quality_score: f64,
    pub approved: bool,
    pub retry_count: u32,
    pub image_retry_count: u32,
    pub revision_feedback: Option<String>,
    pub source_texts: Option<Vec<SourceText>>,
    pub image_results: Vec<ImageResult>,
    /// Nodes visited, in order.
    pub path: Vec<GraphNode>,
    pub phase: GraphPhase,
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl GenerationOutcome {
    /// Extracts the outcome from the final state.
    pub fn from_state(
        state: OrchestrationState,
        path: Vec<GraphNode>,
        elapsed: Duration,
        threshold: f64,
    ) -> Self {
        let images_required = state.request.image_dependency == ImageDependency::Required;
        let image_results = state.image_results.unwrap_or_default();

        let questions: Vec<FinalQuestion> = state
            .questions
            .into_iter()
            .enumerate()
            .map(|(idx, draft)| {
                let result = image_results.iter().find(|r| r.question_index == idx);
                final_question(draft, result, images_required)
            })
            .collect();

        let quality_score = state.quality_score.unwrap_or(0.0);
        let approved = state.quality_score.is_some_and(|s| s >= threshold);
        let phase = if approved && !questions.is_empty() && !questions.iter().any(|q| q.needs_manual_image) {
            GraphPhase::Done
        } else {
            GraphPhase::Degraded
        };

        Self {
            questions,
            quality_score,
            approved,
            retry_count: state.retry_count,
            image_retry_count: state.image_retry_count,
            revision_feedback: state.revision_feedback,
            source_texts: state.source_texts,
            image_results,
            path,
            phase,
            error: state.error,
            elapsed,
        }
    }

    /// Number of questions whose image must be produced by hand.
    pub fn manual_image_count(&self) -> usize {
        self.questions.iter().filter(|q| q.needs_manual_image).count()
    }

    /// Whether the run entered `node` at least once.
    pub fn visited(&self, node: GraphNode) -> bool {
        self.path.contains(&node)
    }
}

fn final_question(
    draft: QuestionDraft,
    result: Option<&ImageResult>,
    images_required: bool,
) -> FinalQuestion {
    match result {
        Some(result) if result.validation_status == ValidationStatus::Valid => FinalQuestion {
            draft,
            image_base64: result.image.as_deref().map(|bytes| STANDARD.encode(bytes)),
            needs_manual_image: result.image.is_none(),
            image_validation_status: Some(result.validation_status),
            image_validation_issues: Vec::new(),
        },
        Some(result) => {
            let mut issues = result.issues.clone();
            if let Some(error) = &result.error {
                issues.push(error.clone());
            }
            FinalQuestion {
                draft,
                image_base64: None,
                needs_manual_image: true,
                image_validation_status: Some(result.validation_status),
                image_validation_issues: issues,
            }
        }
        None => FinalQuestion {
            draft,
            image_base64: None,
            needs_manual_image: images_required,
            image_validation_status: None,
            image_validation_issues: Vec::new(),
        },
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
