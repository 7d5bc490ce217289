//! Quality gates: pure routing decisions after review and image validation.

use serde::{Deserialize, Serialize};

use super::types::{ImageResult, ValidationStatus};

/// Routing decision of a quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Go back and produce another attempt.
    Regenerate,
    /// Leave the loop, approved or not.
    Finish,
}

/// Gate after the text review.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    /// Minimum score to pass.
    pub threshold: f64,
    /// Maximum generation attempts.
    pub max_retries: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_retries: 3,
        }
    }
}

impl QualityGate {
    pub fn new(threshold: f64, max_retries: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            max_retries,
        }
    }

    /// Regenerate iff `score < threshold` and `retry_count < max_retries`.
    ///
    /// An outstanding error at the ceiling always finishes.
    pub fn decide(&self, score: f64, retry_count: u32, error: Option<&str>) -> GateDecision {
        if error.is_some() && retry_count >= self.max_retries {
            tracing::warn!(
                max_retries = self.max_retries,
                "Retry ceiling reached with an outstanding error"
            );
            return GateDecision::Finish;
        }

        if score < self.threshold && retry_count < self.max_retries {
            tracing::info!(
                score,
                threshold = self.threshold,
                attempt = retry_count + 1,
                max_retries = self.max_retries,
                "Quality below threshold, regenerating"
            );
            return GateDecision::Regenerate;
        }

        if self.approves(score) {
            tracing::info!(score, "Quality approved");
        } else {
            tracing::warn!(score, "Retry ceiling reached, finishing below threshold");
        }
        GateDecision::Finish
    }

    /// Whether `score` clears the threshold.
    pub fn approves(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

/// Gate after image validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageQualityGate {
    /// Maximum regeneration rounds.
    pub max_retries: u32,
}

impl Default for ImageQualityGate {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl ImageQualityGate {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Regenerate iff any image is invalid and the retry budget is not spent.
    pub fn decide(&self, results: &[ImageResult], image_retry_count: u32) -> GateDecision {
        let invalid = invalid_indices(results);

        if !invalid.is_empty() && image_retry_count < self.max_retries {
            tracing::info!(
                invalid = invalid.len(),
                attempt = image_retry_count + 1,
                max_retries = self.max_retries,
                "Images rejected, regenerating"
            );
            return GateDecision::Regenerate;
        }

        if invalid.is_empty() {
            tracing::info!("All images settled");
        } else {
            tracing::warn!(
                invalid = ?invalid,
                image_retry_count,
                "Images still invalid, flagging for manual production"
            );
        }
        GateDecision::Finish
    }
}

/// Question indices whose image is currently invalid.
pub fn invalid_indices(results: &[ImageResult]) -> Vec<usize> {
    results
        .iter()
        .filter(|r| r.validation_status == ValidationStatus::Invalid)
        .map(|r| r.question_index)
        .collect()
}
