//! Image Validator Agent.
//!
//! Compares a generated image with the question it illustrates through a
//! vision model and a fixed checklist. `score` is the fraction of checks
//! passed and `valid` requires every check to pass. Corrections are kept
//! only for invalid images and drive the next regeneration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{AgentError, AgentResult};
use super::types::QuestionDraft;
use crate::llm::VisionProvider;
use crate::utils::json_extraction::{parse_json_object, preview};

/// Correction used when no specific instruction is available.
pub const GENERIC_CORRECTION: &str = "Regenerate the image";

const VALIDATION_PROMPT: &str = r#"You review images that accompany assessment questions. Compare the IMAGE with the QUESTION DATA below and decide whether a student can solve the question from the image.

TITLE: {title}
BASE TEXT: {text}
STATEMENT: {statement}
CORRECT ANSWER: {correct_answer}
EXPLANATION: {explanation}
STRUCTURED DATA (what the image should contain):
{image_data}

CHECKLIST:
{checklist}

Respond with ONLY this JSON object:
{
  "checks": {{check_keys}},
  "issues": ["problems found"],
  "corrections": "<specific instructions to fix the image, when any check fails>"
}"#;

/// One item of the validation checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCheck {
    ElementCount,
    Labels,
    Values,
    Coherence,
    Solvability,
    AnswerNotLeaked,
}

impl ImageCheck {
    pub const ALL: [ImageCheck; 6] = [
        Self::ElementCount,
        Self::Labels,
        Self::Values,
        Self::Coherence,
        Self::Solvability,
        Self::AnswerNotLeaked,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::ElementCount => "element_count",
            Self::Labels => "labels",
            Self::Values => "values",
            Self::Coherence => "coherence",
            Self::Solvability => "solvability",
            Self::AnswerNotLeaked => "answer_not_leaked",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            Self::ElementCount => "If the statement mentions N items, does the image show exactly N?",
            Self::Labels => "Are names, legends and labels present and legible?",
            Self::Values => "Are the values, percentages and measures needed present and consistent?",
            Self::Coherence => "Does the image agree with the question without contradicting it?",
            Self::Solvability => "Is the question solvable using the image, rather than the image restating the text?",
            Self::AnswerNotLeaked => "Is the correct answer kept out of the image (not written, circled or highlighted)?",
        }
    }
}

impl fmt::Display for ImageCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Result of one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub check: ImageCheck,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Verdict on one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageVerdict {
    pub valid: bool,
    /// Fraction of checks passed, in `[0, 1]`.
    pub score: f64,
    pub checks: Vec<CheckOutcome>,
    pub issues: Vec<String>,
    /// Instructions for regeneration, present only when invalid.
    pub corrections: Option<String>,
}

impl ImageVerdict {
    /// Invalid verdict for a validator failure, with a generic correction.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            score: 0.0,
            checks: Vec::new(),
            issues: vec![reason.into()],
            corrections: Some(GENERIC_CORRECTION.to_string()),
        }
    }

    /// Builds a verdict from checklist outcomes.
    fn from_checks(
        checks: Vec<CheckOutcome>,
        mut issues: Vec<String>,
        corrections: Option<String>,
    ) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        let score = if checks.is_empty() {
            0.0
        } else {
            passed as f64 / checks.len() as f64
        };
        let valid = !checks.is_empty() && passed == checks.len();

        if !valid && issues.is_empty() {
            issues = checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| match &c.detail {
                    Some(detail) => format!("{}: {}", c.check, detail),
                    None => format!("{} failed", c.check),
                })
                .collect();
        }

        let corrections = if valid {
            None
        } else {
            Some(
                corrections
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| {
                        if issues.is_empty() {
                            GENERIC_CORRECTION.to_string()
                        } else {
                            format!("{}. Fix: {}", GENERIC_CORRECTION, issues.join("; "))
                        }
                    }),
            )
        };

        Self {
            valid,
            score,
            checks,
            issues,
            corrections,
        }
    }
}

/// Image Validator Agent backed by a vision model.
pub struct ImageValidatorAgent {
    vision_client: Arc<dyn VisionProvider>,
}

impl std::fmt::Debug for ImageValidatorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageValidatorAgent").finish_non_exhaustive()
    }
}

impl ImageValidatorAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "image_validator";

    pub fn new(vision_client: Arc<dyn VisionProvider>) -> Self {
        Self { vision_client }
    }

    /// Validates `image` against `question`. Provider or parse failures
    /// produce an invalid verdict with a generic correction.
    pub async fn validate(&self, question: &QuestionDraft, image: &[u8]) -> ImageVerdict {
        match self.try_validate(question, image).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(
                    question_number = question.question_number,
                    error = %err,
                    "Image validation failed, marking image invalid"
                );
                ImageVerdict::rejected(err.to_string())
            }
        }
    }

    /// Validates `image`, surfacing validator failures as errors.
    pub async fn try_validate(
        &self,
        question: &QuestionDraft,
        image: &[u8],
    ) -> AgentResult<ImageVerdict> {
        if image.is_empty() {
            return Err(AgentError::ImageValidation("empty image payload".to_string()));
        }
        let prompt = build_validation_prompt(question);
        let raw = self
            .vision_client
            .analyze(image, &prompt)
            .await
            .map_err(|e| AgentError::ImageValidation(e.to_string()))?;

        let parsed: ValidationResponse = parse_json_object(&raw)?;
        let checks = ImageCheck::ALL
            .iter()
            .map(|check| match parsed.checks.get(check.key()) {
                Some(entry) => CheckOutcome {
                    check: *check,
                    passed: entry.passed(),
                    detail: entry.detail(),
                },
                None => CheckOutcome {
                    check: *check,
                    passed: false,
                    detail: Some("not reported by the validator".to_string()),
                },
            })
            .collect();

        let verdict = ImageVerdict::from_checks(checks, parsed.issues, parsed.corrections);
        tracing::info!(
            question_number = question.question_number,
            valid = verdict.valid,
            score = verdict.score,
            "Image validated"
        );
        Ok(verdict)
    }
}

fn build_validation_prompt(question: &QuestionDraft) -> String {
    let correct_answer = question
        .correct_alternative()
        .map(|a| format!("{}) {}", a.letter, a.text))
        .unwrap_or_else(|| "N/A".to_string());
    let image_data = question
        .image_data
        .as_ref()
        .and_then(|d| serde_json::to_string_pretty(d).ok())
        .unwrap_or_else(|| "No structured data available.".to_string());
    let checklist = ImageCheck::ALL
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}: {}", i + 1, c.key(), c.question()))
        .collect::<Vec<_>>()
        .join("\n");
    let check_keys = ImageCheck::ALL
        .iter()
        .map(|c| format!("\"{}\": {{\"passed\": <bool>, \"detail\": \"...\"}}", c.key()))
        .collect::<Vec<_>>()
        .join(", ");

    VALIDATION_PROMPT
        .replace("{title}", &question.title)
        .replace("{text}", &preview(&question.text, 500))
        .replace("{statement}", &preview(&question.question_statement, 500))
        .replace("{correct_answer}", &correct_answer)
        .replace("{explanation}", &preview(&question.explanation_question, 400))
        .replace("{image_data}", &image_data)
        .replace("{checklist}", &checklist)
        .replace("{check_keys}", &check_keys)
}

/// A checklist entry, either a bare flag or an object with details.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CheckEntry {
    Flag(bool),
    Detailed {
        #[serde(alias = "ok")]
        passed: bool,
        #[serde(default)]
        detail: Option<String>,
    },
}

impl CheckEntry {
    fn passed(&self) -> bool {
        match self {
            Self::Flag(passed) | Self::Detailed { passed, .. } => *passed,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Flag(_) => None,
            Self::Detailed { detail, .. } => detail.clone().filter(|d| !d.trim().is_empty()),
        }
    }
}

/// Response structure from the vision model.
#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(default)]
    checks: BTreeMap<String, CheckEntry>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    corrections: Option<String>,
}
