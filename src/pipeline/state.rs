//! Run state threaded through the question graph.
//!
//! Nodes never mutate [`OrchestrationState`] directly. Each returns a
//! [`NodeUpdate`] naming exactly the fields it may write, and
//! [`OrchestrationState::apply`] merges it after checking the invariants.

use serde::Serialize;

use super::error::GraphError;
use crate::agents::{
    GenerationRequest, ImageResult, QuestionDraft, SourceText, ValidationStatus,
};

/// The single mutable record of a run.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationState {
    pub request: GenerationRequest,
    pub source_texts: Option<Vec<SourceText>>,
    pub questions: Vec<QuestionDraft>,
    pub revision_feedback: Option<String>,
    /// Last review score; `None` before the first review.
    pub quality_score: Option<f64>,
    pub retry_count: u32,
    pub image_results: Option<Vec<ImageResult>>,
    pub image_retry_count: u32,
    pub error: Option<String>,
    /// `image_retry_count` when images were last generated.
    #[serde(skip)]
    last_image_round: Option<u32>,
}

/// Partial update returned by one node.
#[derive(Debug, Clone)]
pub enum NodeUpdate {
    Search {
        source_texts: Option<Vec<SourceText>>,
    },
    Generate {
        questions: Vec<QuestionDraft>,
        retry_count: u32,
        error: Option<String>,
    },
    Review {
        quality_score: f64,
        revision_feedback: Option<String>,
        /// Replaces `error` only when set.
        error: Option<String>,
    },
    ImageGenerate {
        image_results: Vec<ImageResult>,
    },
    ImageValidate {
        image_results: Vec<ImageResult>,
    },
    ImageRetry {
        image_retry_count: u32,
    },
}

impl NodeUpdate {
    /// Name of the node that produces this update.
    pub fn node_name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Generate { .. } => "generate",
            Self::Review { .. } => "review",
            Self::ImageGenerate { .. } => "image_generate",
            Self::ImageValidate { .. } => "image_validate",
            Self::ImageRetry { .. } => "image_retry",
        }
    }
}

impl OrchestrationState {
    /// Fresh state for `request`.
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            source_texts: None,
            questions: Vec::new(),
            revision_feedback: None,
            quality_score: None,
            retry_count: 0,
            image_results: None,
            image_retry_count: 0,
            error: None,
            last_image_round: None,
        }
    }

    /// Image result for a question index, if any.
    pub fn image_result(&self, index: usize) -> Option<&ImageResult> {
        self.image_results
            .as_ref()
            .and_then(|results| results.iter().find(|r| r.question_index == index))
    }

    /// Merges a node update.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::InvalidUpdate` when counters do not advance by
    /// exactly one or results outnumber questions, and
    /// `GraphError::IllegalTransition` when an image status moves backwards.
    pub fn apply(&mut self, update: NodeUpdate) -> Result<(), GraphError> {
        let node = update.node_name();
        let invalid = |reason: String| GraphError::InvalidUpdate { node, reason };

        match update {
            NodeUpdate::Search { source_texts } => {
                self.source_texts = source_texts;
            }
            NodeUpdate::Generate {
                questions,
                retry_count,
                error,
            } => {
                if retry_count != self.retry_count + 1 {
                    return Err(invalid(format!(
                        "retry_count must advance from {} to {}, got {}",
                        self.retry_count,
                        self.retry_count + 1,
                        retry_count
                    )));
                }
                self.questions = questions;
                self.retry_count = retry_count;
                self.error = error;
            }
            NodeUpdate::Review {
                quality_score,
                revision_feedback,
                error,
            } => {
                if !(0.0..=1.0).contains(&quality_score) {
                    return Err(invalid(format!("quality_score {} out of range", quality_score)));
                }
                self.quality_score = Some(quality_score);
                self.revision_feedback = revision_feedback;
                if error.is_some() {
                    self.error = error;
                }
            }
            NodeUpdate::ImageGenerate { image_results } => {
                self.check_result_count(&image_results, node)?;
                let regenerating = self.last_image_round.is_some();
                if regenerating && self.last_image_round >= Some(self.image_retry_count) {
                    let touched = image_results.iter().any(|new| {
                        self.image_result(new.question_index)
                            .is_some_and(|old| old.validation_status == ValidationStatus::Invalid)
                    });
                    if touched {
                        return Err(invalid(
                            "invalid images regenerated without advancing image_retry_count"
                                .to_string(),
                        ));
                    }
                }
                self.check_transitions(&image_results, true)?;
                self.image_results = Some(image_results);
                self.last_image_round = Some(self.image_retry_count);
            }
            NodeUpdate::ImageValidate { image_results } => {
                self.check_result_count(&image_results, node)?;
                self.check_transitions(&image_results, false)?;
                self.image_results = Some(image_results);
            }
            NodeUpdate::ImageRetry { image_retry_count } => {
                if image_retry_count != self.image_retry_count + 1 {
                    return Err(invalid(format!(
                        "image_retry_count must advance from {}, got {}",
                        self.image_retry_count, image_retry_count
                    )));
                }
                self.image_retry_count = image_retry_count;
            }
        }
        Ok(())
    }

    fn check_result_count(
        &self,
        results: &[ImageResult],
        node: &'static str,
    ) -> Result<(), GraphError> {
        if results.len() > self.questions.len() {
            return Err(GraphError::InvalidUpdate {
                node,
                reason: format!(
                    "{} image results for {} questions",
                    results.len(),
                    self.questions.len()
                ),
            });
        }
        Ok(())
    }

    /// Every status change must be a legal transition. A regeneration may
    /// pass through `pending` within one update (`invalid -> pending -> x`).
    fn check_transitions(
        &self,
        results: &[ImageResult],
        allow_regeneration: bool,
    ) -> Result<(), GraphError> {
        for new in results {
            let Some(old) = self.image_result(new.question_index) else {
                continue;
            };
            let from = old.validation_status;
            let to = new.validation_status;
            let direct = from.can_transition_to(to);
            let via_pending = allow_regeneration
                && from.can_transition_to(ValidationStatus::Pending)
                && ValidationStatus::Pending.can_transition_to(to);
            if !direct && !via_pending {
                return Err(GraphError::IllegalTransition {
                    index: new.question_index,
                    from,
                    to,
                });
            }
        }
        Ok(())
    }
}
