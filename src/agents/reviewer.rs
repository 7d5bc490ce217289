//! Quality Reviewer Agent.
//!
//! Scores a question batch against a fixed pedagogical rubric and decides
//! approval locally: `overall = mean(sub-scores) / 10`, approved iff
//! `overall >= threshold`. Reviewer outages are resolved by a
//! [`ReviewFailurePolicy`] instead of bubbling up to the graph.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{AgentError, AgentResult};
use super::types::{GenerationRequest, QuestionDraft};
use crate::llm::{CompletionRequest, LlmProvider, Message};
use crate::utils::json_extraction::{extract_json_object, preview, JsonExtractionResult};

/// System prompt for the pedagogical review.
const REVIEWER_SYSTEM_PROMPT: &str = r#"You are a senior reviewer of large-scale assessment items. You grade each question from 0 to 10 on every rubric criterion and describe concrete, actionable problems.

Be strict about: answers visible in the image, distractors that are obviously wrong or also correct, statements that do not measure the target skill, and numeric inconsistencies between text, image data and alternatives. When a criterion does not apply (no image, no geometry), give it 10."#;

/// User prompt template for the review.
const REVIEWER_USER_TEMPLATE: &str = r#"Review the following batch.

Target skill: {skill}
Proficiency level: {proficiency_level}
Grade: {grade}
Image policy: {image_dependency}

Rubric criteria (score each 0-10):
{criteria}

QUESTIONS:
{questions}

Respond with ONLY this JSON object:
{
  "reviews": [
    {
      "question_number": 1,
      "scores": {{score_keys}},
      "issues": ["problems found"],
      "suggestions": ["how to fix them"]
    }
  ],
  "overall_score": <mean of all scores / 10>,
  "approved": <true if overall_score >= {threshold}>,
  "summary_feedback": "<correction instructions when not approved>"
}"#;

/// One rubric criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCriterion {
    CurriculumAlignment,
    Distractors,
    Clarity,
    ProficiencyFit,
    BaseText,
    ImageCoherence,
    MathCoherence,
}

impl ReviewCriterion {
    /// Every criterion, in rubric order.
    pub const ALL: [ReviewCriterion; 7] = [
        Self::CurriculumAlignment,
        Self::Distractors,
        Self::Clarity,
        Self::ProficiencyFit,
        Self::BaseText,
        Self::ImageCoherence,
        Self::MathCoherence,
    ];

    /// JSON key used in the review response.
    pub fn key(&self) -> &'static str {
        match self {
            Self::CurriculumAlignment => "curriculum_alignment",
            Self::Distractors => "distractors",
            Self::Clarity => "clarity",
            Self::ProficiencyFit => "proficiency_fit",
            Self::BaseText => "base_text",
            Self::ImageCoherence => "image_coherence",
            Self::MathCoherence => "math_coherence",
        }
    }

    /// What the reviewer checks for this criterion.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CurriculumAlignment => "the question measures the stated skill",
            Self::Distractors => "wrong alternatives are plausible and map to real misconceptions",
            Self::Clarity => "the statement is unambiguous and grade-appropriate",
            Self::ProficiencyFit => "difficulty matches the proficiency level",
            Self::BaseText => "the base text is adequate, cited and necessary",
            Self::ImageCoherence => "image directives agree with the text and do not leak the answer",
            Self::MathCoherence => "numbers, units and formulas are consistent",
        }
    }
}

impl fmt::Display for ReviewCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What to do when the reviewer itself fails (provider error or unparsable
/// verdict), as opposed to rejecting the batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewFailurePolicy {
    /// Approve with a neutral score so the run is not blocked by the outage.
    FailOpen { neutral_score: f64 },
    /// Score zero with feedback so the normal regeneration path applies.
    FailClosed,
}

impl Default for ReviewFailurePolicy {
    fn default() -> Self {
        Self::FailOpen {
            neutral_score: 0.75,
        }
    }
}

/// Per-question review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionReview {
    #[serde(default)]
    pub question_number: u32,
    /// Sub-scores keyed by criterion key, each in `[0, 10]`.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Outcome of reviewing one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewVerdict {
    /// Overall score in `[0, 1]`.
    pub overall_score: f64,
    pub approved: bool,
    /// Correction instructions, present only when not approved.
    pub feedback: Option<String>,
    pub reviews: Vec<QuestionReview>,
    /// Set when the verdict came from the failure policy rather than a review.
    pub error: Option<String>,
}

impl ReviewVerdict {
    /// Mean of every sub-score in the batch, or `None` if there are none.
    pub fn mean_sub_score(reviews: &[QuestionReview]) -> Option<f64> {
        let scores: Vec<f64> = reviews
            .iter()
            .flat_map(|r| r.scores.values())
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 10.0))
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Whether this verdict stands in for a failed review.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Configuration for the Quality Reviewer Agent.
#[derive(Debug, Clone)]
pub struct QualityReviewerConfig {
    /// Temperature for LLM generation.
    pub temperature: f64,
    /// Maximum tokens for LLM response.
    pub max_tokens: u32,
    /// Minimum overall score for approval.
    pub threshold: f64,
    pub failure_policy: ReviewFailurePolicy,
}

impl Default for QualityReviewerConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4000,
            threshold: 0.7,
            failure_policy: ReviewFailurePolicy::default(),
        }
    }
}

impl QualityReviewerConfig {
    /// Sets the temperature for LLM generation.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Sets the maximum tokens for LLM response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the approval threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the reviewer failure policy.
    pub fn with_failure_policy(mut self, policy: ReviewFailurePolicy) -> Self {
        self.failure_policy = match policy {
            ReviewFailurePolicy::FailOpen { neutral_score } => ReviewFailurePolicy::FailOpen {
                neutral_score: neutral_score.clamp(0.0, 1.0),
            },
            other => other,
        };
        self
    }
}

/// Quality Reviewer Agent that grades question batches.
pub struct QualityReviewerAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: QualityReviewerConfig,
}

impl std::fmt::Debug for QualityReviewerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityReviewerAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QualityReviewerAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "quality_reviewer";

    /// Creates a new reviewer agent.
    pub fn new(llm_client: Arc<dyn LlmProvider>, config: QualityReviewerConfig) -> Self {
        Self { llm_client, config }
    }

    /// Creates a new reviewer with default configuration.
    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, QualityReviewerConfig::default())
    }

    /// Returns the approval threshold.
    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Reviews a batch. Never fails: an empty batch scores zero, and a
    /// reviewer failure is resolved by the configured failure policy.
    pub async fn review(
        &self,
        request: &GenerationRequest,
        questions: &[QuestionDraft],
    ) -> ReviewVerdict {
        if questions.is_empty() {
            return ReviewVerdict {
                overall_score: 0.0,
                approved: false,
                feedback: Some("No question was generated. Generate the full batch again.".to_string()),
                reviews: Vec::new(),
                error: None,
            };
        }

        match self.try_review(request, questions).await {
            Ok(verdict) => verdict,
            Err(err) => self.on_failure(err),
        }
    }

    /// Reviews a batch, surfacing reviewer failures as errors.
    pub async fn try_review(
        &self,
        request: &GenerationRequest,
        questions: &[QuestionDraft],
    ) -> AgentResult<ReviewVerdict> {
        let prompt = self.build_prompt(request, questions)?;
        let llm_request = CompletionRequest::new(
            "",
            vec![
                Message::system(REVIEWER_SYSTEM_PROMPT),
                Message::user(prompt),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm_client.generate(llm_request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AgentError::Review("Empty LLM response".to_string()))?;

        let verdict = self.parse_response(content)?;
        tracing::info!(
            overall_score = verdict.overall_score,
            approved = verdict.approved,
            "Batch reviewed"
        );
        Ok(verdict)
    }

    fn build_prompt(
        &self,
        request: &GenerationRequest,
        questions: &[QuestionDraft],
    ) -> AgentResult<String> {
        let criteria = ReviewCriterion::ALL
            .iter()
            .map(|c| format!("- {}: {}", c.key(), c.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let score_keys = ReviewCriterion::ALL
            .iter()
            .map(|c| format!("\"{}\": <0-10>", c.key()))
            .collect::<Vec<_>>()
            .join(", ");
        let questions_json = serde_json::to_string_pretty(questions)?;

        Ok(REVIEWER_USER_TEMPLATE
            .replace("{skill}", &request.skill)
            .replace("{proficiency_level}", &request.proficiency_level)
            .replace("{grade}", &request.grade)
            .replace("{image_dependency}", request.image_dependency.as_str())
            .replace("{criteria}", &criteria)
            .replace("{score_keys}", &score_keys)
            .replace("{threshold}", &self.config.threshold.to_string())
            .replace("{questions}", &questions_json))
    }

    /// Parses the verdict and recomputes score and approval locally.
    fn parse_response(&self, content: &str) -> AgentResult<ReviewVerdict> {
        let json = match extract_json_object(content) {
            JsonExtractionResult::Success(json) => json,
            JsonExtractionResult::Truncated {
                unclosed_braces,
                unclosed_brackets,
                ..
            } => {
                return Err(AgentError::ResponseParseError(format!(
                    "review JSON truncated: {} unclosed braces, {} unclosed brackets",
                    unclosed_braces, unclosed_brackets
                )))
            }
            JsonExtractionResult::NotFound { content_preview } => {
                tracing::warn!(content_preview = %content_preview, "Could not find JSON in review response");
                return Err(AgentError::ResponseParseError(
                    "no JSON object in review response".to_string(),
                ));
            }
        };
        let raw: ReviewResponse = serde_json::from_str(&json)
            .map_err(|e| AgentError::ResponseParseError(format!("Invalid review JSON: {}", e)))?;

        let overall_score = match ReviewVerdict::mean_sub_score(&raw.reviews) {
            Some(mean) => mean / 10.0,
            None => match raw.overall_score {
                Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
                _ => {
                    return Err(AgentError::Review(
                        "review contains neither sub-scores nor an overall score".to_string(),
                    ))
                }
            },
        };
        if raw.approved.is_some_and(|a| a != (overall_score >= self.config.threshold)) {
            tracing::debug!(
                reported = ?raw.approved,
                overall_score,
                "Reviewer approval disagrees with recomputed score, using score"
            );
        }
        let approved = overall_score >= self.config.threshold;

        let feedback = if approved {
            None
        } else {
            Some(summarize_feedback(raw.summary_feedback.as_deref(), &raw.reviews))
        };

        Ok(ReviewVerdict {
            overall_score,
            approved,
            feedback,
            reviews: raw.reviews,
            error: None,
        })
    }

    fn on_failure(&self, err: AgentError) -> ReviewVerdict {
        let message = err.to_string();
        match self.config.failure_policy {
            ReviewFailurePolicy::FailOpen { neutral_score } => {
                let approved = neutral_score >= self.config.threshold;
                if approved {
                    tracing::warn!(
                        error = %message,
                        neutral_score,
                        "Reviewer failed, approving batch with neutral score"
                    );
                } else {
                    tracing::warn!(
                        error = %message,
                        neutral_score,
                        threshold = self.config.threshold,
                        "Reviewer failed and neutral score is below threshold, batch not approved"
                    );
                }
                ReviewVerdict {
                    overall_score: neutral_score,
                    approved,
                    feedback: (!approved).then(|| unreviewed_feedback(&message)),
                    reviews: Vec::new(),
                    error: Some(message),
                }
            }
            ReviewFailurePolicy::FailClosed => {
                tracing::warn!(error = %message, "Reviewer failed, rejecting batch");
                ReviewVerdict {
                    overall_score: 0.0,
                    approved: false,
                    feedback: Some(unreviewed_feedback(&message)),
                    reviews: Vec::new(),
                    error: Some(message),
                }
            }
        }
    }
}

fn unreviewed_feedback(message: &str) -> String {
    format!(
        "The batch could not be reviewed ({}). Regenerate it following every rubric criterion.",
        preview(message, 200)
    )
}

/// Uses the reviewer's summary, or assembles one from per-question issues.
fn summarize_feedback(summary: Option<&str>, reviews: &[QuestionReview]) -> String {
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        return summary.to_string();
    }
    let lines: Vec<String> = reviews
        .iter()
        .flat_map(|r| {
            r.issues
                .iter()
                .chain(r.suggestions.iter())
                .map(move |i| format!("Q{}: {}", r.question_number, i))
        })
        .collect();
    if lines.is_empty() {
        "The batch scored below the approval threshold. Improve every rubric criterion.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Response structure from the review LLM.
#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    reviews: Vec<QuestionReview>,
    #[serde(default)]
    overall_score: Option<f64>,
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default)]
    summary_feedback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::Alternative;
    use crate::error::LlmError;
    use crate::llm::{Choice, CompletionResponse, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: Mutex<Result<String, String>>,
    }

    impl MockLlmProvider {
        fn ok(response: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(Ok(response.into())),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                response: Mutex::new(Err(message.to_string())),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let response = self.response.lock().expect("lock not poisoned").clone();
            let content = response.map_err(LlmError::RequestFailed)?;
            Ok(CompletionResponse {
                id: "mock".to_string(),
                model: "mock".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn question() -> QuestionDraft {
        QuestionDraft {
            question_number: 1,
            question_statement: "Qual é a capital?".to_string(),
            alternatives: vec![
                Alternative {
                    letter: "A".to_string(),
                    text: "Brasília".to_string(),
                    distractor: None,
                    is_correct: true,
                },
                Alternative {
                    letter: "B".to_string(),
                    text: "Rio".to_string(),
                    distractor: None,
                    is_correct: false,
                },
            ],
            correct_answer: "A".to_string(),
            ..Default::default()
        }
    }

    fn review_json(scores: &[f64], approved: bool, overall: f64) -> String {
        let keys: Vec<String> = ReviewCriterion::ALL
            .iter()
            .zip(scores)
            .map(|(c, s)| format!("\"{}\": {}", c.key(), s))
            .collect();
        format!(
            r#"{{"reviews": [{{"question_number": 1, "scores": {{{}}}, "issues": ["weak distractor B"]}}],
               "overall_score": {}, "approved": {}, "summary_feedback": ""}}"#,
            keys.join(", "),
            overall,
            approved
        )
    }

    #[tokio::test]
    async fn test_empty_batch_scores_zero() {
        let agent = QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::ok("{}")));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[]).await;
        assert_eq!(verdict.overall_score, 0.0);
        assert!(!verdict.approved);
        assert!(verdict.feedback.is_some());
        assert!(!verdict.is_degraded());
    }

    #[tokio::test]
    async fn test_threshold_is_exact() {
        // Mean of 7 sevens is exactly 7.0, so overall is 0.7.
        let body = review_json(&[7.0; 7], false, 0.1);
        let agent = QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::ok(body)));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert!((verdict.overall_score - 0.7).abs() < 1e-12);
        assert!(verdict.approved);
        assert!(verdict.feedback.is_none());
    }

    #[tokio::test]
    async fn test_rejection_carries_feedback_from_issues() {
        let body = review_json(&[5.0, 6.0, 7.0, 5.0, 6.0, 7.0, 6.0], true, 0.9);
        let agent = QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::ok(body)));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert!((verdict.overall_score - 0.6).abs() < 1e-9);
        assert!(!verdict.approved);
        assert_eq!(verdict.feedback.as_deref(), Some("Q1: weak distractor B"));
    }

    #[tokio::test]
    async fn test_overall_score_used_without_sub_scores() {
        let body = r#"{"reviews": [], "overall_score": 0.82, "approved": true}"#;
        let agent = QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::ok(body)));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert!((verdict.overall_score - 0.82).abs() < 1e-12);
        assert!(verdict.approved);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_open() {
        let agent =
            QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::failing("outage")));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert_eq!(verdict.overall_score, 0.75);
        assert!(verdict.approved);
        assert!(verdict.feedback.is_none());
        assert!(verdict.is_degraded());
    }

    #[tokio::test]
    async fn test_unparsable_verdict_fails_open() {
        let agent = QualityReviewerAgent::with_defaults(Arc::new(MockLlmProvider::ok(
            "Looks fine to me!",
        )));
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert!(verdict.approved);
        assert!(verdict.error.is_some());
    }

    #[tokio::test]
    async fn test_fail_open_below_threshold_is_not_approved() {
        let agent = QualityReviewerAgent::new(
            Arc::new(MockLlmProvider::failing("outage")),
            QualityReviewerConfig::default().with_threshold(0.8),
        );
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert_eq!(verdict.overall_score, 0.75);
        assert_eq!(verdict.approved, verdict.overall_score >= agent.threshold());
        assert!(!verdict.approved);
        assert!(verdict.feedback.as_deref().is_some_and(|f| f.contains("outage")));
        assert!(verdict.is_degraded());
    }

    #[tokio::test]
    async fn test_fail_closed_policy_rejects() {
        let agent = QualityReviewerAgent::new(
            Arc::new(MockLlmProvider::failing("outage")),
            QualityReviewerConfig::default().with_failure_policy(ReviewFailurePolicy::FailClosed),
        );
        let request = GenerationRequest::new("D1", "2", "5");
        let verdict = agent.review(&request, &[question()]).await;
        assert_eq!(verdict.overall_score, 0.0);
        assert!(!verdict.approved);
        assert!(verdict.feedback.is_some());
    }

    #[test]
    fn test_sub_scores_are_clamped() {
        let review = QuestionReview {
            scores: BTreeMap::from([("clarity".to_string(), 14.0), ("distractors".to_string(), -2.0)]),
            ..Default::default()
        };
        assert_eq!(ReviewVerdict::mean_sub_score(&[review]), Some(5.0));
        assert_eq!(ReviewVerdict::mean_sub_score(&[]), None);
    }
}
