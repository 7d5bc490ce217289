//! Domain types shared by the question-generation agents.
//!
//! This module defines the request that drives a run, the question drafts the
//! generator produces, the authentic source texts the searcher supplies, and
//! the per-question image results tracked by the image stage.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{AgentError, AgentResult};

/// Largest number of alternatives a question may have (letters A to J).
pub const MAX_ALTERNATIVES: u32 = 10;

/// Request-level policy for how a question relates to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDependency {
    /// No visual reference of any kind.
    #[default]
    None,
    /// Visuals are decorative; the question is answerable from text alone.
    Optional,
    /// The question is unanswerable without the image.
    Required,
}

impl ImageDependency {
    /// Returns the wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for ImageDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageDependency {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(AgentError::InvalidRequest(format!(
                "unknown image dependency '{}': expected none, optional or required",
                other
            ))),
        }
    }
}

/// Large-scale assessment the items are modeled after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationModel {
    /// Sistema de Avaliação da Educação Básica.
    #[default]
    Saeb,
    /// Sistema de Avaliação Educacional do Maranhão.
    Seama,
    /// Exame Nacional do Ensino Médio.
    Enem,
}

impl EvaluationModel {
    /// Returns the display name used in prompts and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saeb => "SAEB",
            Self::Seama => "SEAMA",
            Self::Enem => "ENEM",
        }
    }
}

impl fmt::Display for EvaluationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvaluationModel {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SAEB" => Ok(Self::Saeb),
            "SEAMA" => Ok(Self::Seama),
            "ENEM" => Ok(Self::Enem),
            other => Err(AgentError::InvalidRequest(format!(
                "unknown evaluation model '{}'",
                other
            ))),
        }
    }
}

/// Immutable input of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Number of questions to generate.
    pub count_questions: u32,
    /// Number of alternatives per question.
    pub count_alternatives: u32,
    /// Target skill, usually "<code> - <description>".
    pub skill: String,
    /// Proficiency level the items must fit.
    pub proficiency_level: String,
    /// School grade.
    pub grade: String,
    /// Curriculum component (subject), if any.
    #[serde(default)]
    pub curriculum_component: String,
    /// Ground the base texts on authentic published works.
    #[serde(default)]
    pub authentic: bool,
    /// Retrieve real source texts before generating.
    #[serde(default)]
    pub use_real_text: bool,
    /// Image policy for the batch.
    #[serde(default)]
    pub image_dependency: ImageDependency,
    /// Assessment model the items imitate.
    #[serde(default, alias = "model_evaluation_type")]
    pub evaluation_model: EvaluationModel,
}

impl GenerationRequest {
    /// Creates a request for one four-alternative question with default flags.
    pub fn new(
        skill: impl Into<String>,
        proficiency_level: impl Into<String>,
        grade: impl Into<String>,
    ) -> Self {
        Self {
            count_questions: 1,
            count_alternatives: 4,
            skill: skill.into(),
            proficiency_level: proficiency_level.into(),
            grade: grade.into(),
            curriculum_component: String::new(),
            authentic: false,
            use_real_text: false,
            image_dependency: ImageDependency::None,
            evaluation_model: EvaluationModel::Saeb,
        }
    }

    /// Sets the number of questions.
    pub fn with_count_questions(mut self, count: u32) -> Self {
        self.count_questions = count;
        self
    }

    /// Sets the number of alternatives per question.
    pub fn with_count_alternatives(mut self, count: u32) -> Self {
        self.count_alternatives = count;
        self
    }

    /// Sets the curriculum component.
    pub fn with_curriculum_component(mut self, component: impl Into<String>) -> Self {
        self.curriculum_component = component.into();
        self
    }

    /// Sets the authentic-sourcing flag.
    pub fn with_authentic(mut self, authentic: bool) -> Self {
        self.authentic = authentic;
        self
    }

    /// Sets the real-text search flag.
    pub fn with_use_real_text(mut self, use_real_text: bool) -> Self {
        self.use_real_text = use_real_text;
        self
    }

    /// Sets the image dependency mode.
    pub fn with_image_dependency(mut self, mode: ImageDependency) -> Self {
        self.image_dependency = mode;
        self
    }

    /// Sets the evaluation model.
    pub fn with_evaluation_model(mut self, model: EvaluationModel) -> Self {
        self.evaluation_model = model;
        self
    }

    /// Checks the request parameters before any provider is called.
    pub fn validate(&self) -> AgentResult<()> {
        if self.count_questions == 0 {
            return Err(AgentError::InvalidRequest(
                "count_questions must be greater than 0".to_string(),
            ));
        }
        if !(2..=MAX_ALTERNATIVES).contains(&self.count_alternatives) {
            return Err(AgentError::InvalidRequest(format!(
                "count_alternatives must be between 2 and {}",
                MAX_ALTERNATIVES
            )));
        }
        if self.skill.trim().is_empty() {
            return Err(AgentError::InvalidRequest("skill cannot be empty".to_string()));
        }
        if self.grade.trim().is_empty() {
            return Err(AgentError::InvalidRequest("grade cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Letters of the requested alternatives, e.g. `["A", "B", "C", "D"]`.
    pub fn alternative_letters(&self) -> Vec<String> {
        (b'A'..)
            .take(self.count_alternatives.min(MAX_ALTERNATIVES) as usize)
            .map(|b| (b as char).to_string())
            .collect()
    }
}

/// An authentic excerpt used as the reading passage of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceText {
    /// Body of the excerpt.
    pub text: String,
    /// Title of the work.
    #[serde(default)]
    pub title: String,
    /// Author of the work.
    #[serde(default)]
    pub author: String,
    /// Where the excerpt was found.
    #[serde(default)]
    pub source_url: String,
    /// Name of the publication or collection.
    #[serde(default)]
    pub source_name: String,
}

/// One answer option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    /// Option letter ("A", "B", ...).
    pub letter: String,
    /// Option text.
    pub text: String,
    /// Why the option is plausible but wrong, or why it is right.
    #[serde(default)]
    pub distractor: Option<String>,
    /// Whether this is the correct option.
    #[serde(default)]
    pub is_correct: bool,
}

/// A generated multiple-choice question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    #[serde(default)]
    pub question_number: u32,
    #[serde(default)]
    pub id_skill: String,
    #[serde(default)]
    pub skill: String,
    #[serde(default)]
    pub proficiency_level: String,
    #[serde(default)]
    pub proficiency_description: String,
    /// Title of the base text.
    #[serde(default)]
    pub title: String,
    /// Base text the question is built on.
    #[serde(default)]
    pub text: String,
    /// Provenance of the base text.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_author: Option<String>,
    pub question_statement: String,
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation_question: String,
    /// Free-form directives telling the image stage what to render.
    #[serde(default)]
    pub image_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl QuestionDraft {
    /// Returns the correct alternative, if exactly one is flagged.
    pub fn correct_alternative(&self) -> Option<&Alternative> {
        let mut correct = self.alternatives.iter().filter(|a| a.is_correct);
        match (correct.next(), correct.next()) {
            (Some(alt), None) => Some(alt),
            _ => None,
        }
    }

    /// Enforces the draft invariants, filling whichever side of the answer
    /// key the model omitted.
    ///
    /// Exactly one alternative must be correct and `correct_answer` must name
    /// its letter. When only the letter is given the flags are derived from it;
    /// when only a flag is given the letter is derived from it.
    pub fn normalize(&mut self, position: usize) -> AgentResult<()> {
        if self.question_number == 0 {
            self.question_number = position as u32 + 1;
        }
        let number = self.question_number;
        let invalid = |reason: String| AgentError::InvalidQuestion {
            question_number: number,
            reason,
        };

        if self.question_statement.trim().is_empty() {
            return Err(invalid("missing question statement".to_string()));
        }
        if self.alternatives.len() < 2 {
            return Err(invalid(format!(
                "expected at least 2 alternatives, found {}",
                self.alternatives.len()
            )));
        }

        for alt in &mut self.alternatives {
            alt.letter = normalize_letter(&alt.letter);
        }
        let mut letters: Vec<&str> = self.alternatives.iter().map(|a| a.letter.as_str()).collect();
        letters.sort_unstable();
        letters.dedup();
        if letters.len() != self.alternatives.len() || letters.iter().any(|l| l.is_empty()) {
            return Err(invalid("alternative letters must be unique and non-empty".to_string()));
        }

        let answer = normalize_letter(&self.correct_answer);
        let flagged: Vec<String> = self
            .alternatives
            .iter()
            .filter(|a| a.is_correct)
            .map(|a| a.letter.clone())
            .collect();

        let correct_letter = match (flagged.as_slice(), answer.is_empty()) {
            ([], true) => return Err(invalid("no correct alternative given".to_string())),
            ([], false) => {
                if !self.alternatives.iter().any(|a| a.letter == answer) {
                    return Err(invalid(format!(
                        "correct answer '{}' matches no alternative",
                        answer
                    )));
                }
                answer
            }
            ([only], true) => only.clone(),
            ([only], false) if *only == answer => answer,
            ([only], false) => {
                return Err(invalid(format!(
                    "correct answer '{}' disagrees with flagged alternative '{}'",
                    answer, only
                )))
            }
            (many, _) => {
                return Err(invalid(format!(
                    "{} alternatives are flagged correct",
                    many.len()
                )))
            }
        };

        for alt in &mut self.alternatives {
            alt.is_correct = alt.letter == correct_letter;
        }
        self.correct_answer = correct_letter;
        Ok(())
    }
}

/// Reduces "a)", " (B) ", "c." to the bare uppercase letter.
fn normalize_letter(raw: &str) -> String {
    raw.chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}

/// Validation status of one question's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// Generated, not yet reviewed.
    Pending,
    /// Passed every check.
    Valid,
    /// Failed a check; eligible for corrective regeneration.
    Invalid,
    /// The provider failed; never retried automatically.
    Error,
}

impl ValidationStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Statuses only move forward from `pending`; the single way back is
    /// `invalid -> pending`, taken by an explicit regeneration step.
    pub fn can_transition_to(self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        matches!(
            (self, next),
            (Pending, Valid) | (Pending, Invalid) | (Pending, Error) | (Invalid, Pending)
        ) || self == next
    }

    /// Returns true for statuses that are never regenerated.
    pub fn is_settled(self) -> bool {
        matches!(self, ValidationStatus::Valid | ValidationStatus::Error)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Image stage bookkeeping for one question index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageResult {
    /// Index of the question in the batch.
    pub question_index: usize,
    /// Raw image bytes, absent when generation failed.
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
    pub validation_status: ValidationStatus,
    /// Generation attempts made for this question.
    pub attempts: u32,
    /// Validator instructions for the next attempt; set only when invalid.
    pub corrections: Option<String>,
    /// Problems the validator found.
    pub issues: Vec<String>,
    /// Fraction of validator checks passed.
    pub score: Option<f64>,
    /// Provider failure message when status is `error`.
    pub error: Option<String>,
}

impl ImageResult {
    /// A freshly generated image awaiting validation.
    pub fn pending(question_index: usize, image: Vec<u8>, attempts: u32) -> Self {
        Self {
            question_index,
            image: Some(image),
            validation_status: ValidationStatus::Pending,
            attempts,
            corrections: None,
            issues: Vec::new(),
            score: None,
            error: None,
        }
    }

    /// A generation or validation failure for this question.
    pub fn failed(question_index: usize, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            question_index,
            image: None,
            validation_status: ValidationStatus::Error,
            attempts,
            corrections: None,
            issues: Vec::new(),
            score: None,
            error: Some(message.into()),
        }
    }

    /// Whether the image must be produced by hand.
    pub fn needs_manual_image(&self) -> bool {
        self.validation_status != ValidationStatus::Valid || self.image.is_none()
    }
}
