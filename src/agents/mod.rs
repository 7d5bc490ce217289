//! Agents for question generation, pedagogical review and image production.

pub mod error;
pub mod generator;
pub mod image_generator;
pub mod image_validator;
pub mod quality_gate;
pub mod reviewer;
pub mod searcher;
pub mod types;

pub use error::{AgentError, AgentResult};
pub use generator::{
    image_instructions, PromptTemplate, QuestionGeneratorAgent, QuestionGeneratorConfig,
};
pub use image_generator::{
    build_image_prompt, ImageGeneratorAgent, ImageGeneratorConfig, ImageKind,
};
pub use image_validator::{
    CheckOutcome, ImageCheck, ImageValidatorAgent, ImageVerdict, GENERIC_CORRECTION,
};
pub use quality_gate::{invalid_indices, GateDecision, ImageQualityGate, QualityGate};
pub use reviewer::{
    QualityReviewerAgent, QualityReviewerConfig, QuestionReview, ReviewCriterion,
    ReviewFailurePolicy, ReviewVerdict,
};
pub use searcher::{
    CuratedTextProvider, FallbackTextProvider, SourceTextProvider, TextSearchAgent,
};
pub use types::{
    Alternative, EvaluationModel, GenerationRequest, ImageDependency, ImageResult,
    QuestionDraft, SourceText, ValidationStatus, MAX_ALTERNATIVES,
};
