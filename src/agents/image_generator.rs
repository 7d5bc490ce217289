//! Image Generator Agent.
//!
//! Turns one finished question into an illustration. The prompt is built
//! locally from the question (a technical-diagram branch for geometry, an
//! illustration branch otherwise) and may be refined by an optional LLM
//! prompt-engineer pass, which falls back to the local prompt on any failure.
//! Corrective regeneration either edits the previous image or draws anew.

use std::sync::Arc;

use serde::Deserialize;

use super::error::{AgentError, AgentResult};
use super::types::QuestionDraft;
use crate::llm::{AspectRatio, CompletionRequest, ImageProvider, LlmProvider, Message};
use crate::utils::json_extraction::{parse_json_object, preview};

/// Words that mark a question as geometry, asking for a technical diagram.
const GEOMETRY_KEYWORDS: &[&str] = &[
    "triângulo", "triangulo", "quadrado", "retângulo", "retangulo", "pentágono", "pentagono",
    "hexágono", "hexagono", "círculo", "circulo", "diagonal", "ângulo", "angulo", "vértice",
    "vertice", "paralel", "perpendicular", "bissetriz", "hipotenusa", "cateto", "pitágoras",
    "pitagoras", "polígono", "poligono", "perímetro", "perimetro", "segmento", "radianos",
    "triangle", "square", "rectangle", "circle", "angle", "polygon", "perimeter", "hypotenuse",
];

/// System prompt for the optional prompt-engineer pass.
const PROMPT_ENGINEER_SYSTEM_PROMPT: &str = r#"You are an art director for educational assessments. Given a question, you write one self-contained prompt for an image model.

The image must contain every visual element the statement and the alternatives refer to, in the exact quantities and with the exact labels and values of the structured data. It must never show, highlight or write the correct answer.

Respond with ONLY this JSON object:
{
  "kind": "technical_diagram" | "comic_strip" | "illustration",
  "image_prompt": "<complete prompt>"
}"#;

/// Kind of picture a question calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Clean labelled geometry diagram.
    TechnicalDiagram,
    /// Scene, chart or comic illustration.
    Illustration,
}

impl ImageKind {
    /// Classifies a question by the geometry vocabulary in its text.
    pub fn classify(question: &QuestionDraft) -> Self {
        let haystack = format!(
            "{} {} {}",
            question.title, question.question_statement, question.text
        )
        .to_lowercase();
        if GEOMETRY_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            Self::TechnicalDiagram
        } else {
            Self::Illustration
        }
    }
}

/// Configuration for the Image Generator Agent.
#[derive(Debug, Clone)]
pub struct ImageGeneratorConfig {
    pub aspect_ratio: AspectRatio,
    /// Edit the previous image on regeneration instead of drawing anew.
    pub edit_on_regenerate: bool,
    /// Temperature of the prompt-engineer pass.
    pub engineer_temperature: f64,
    pub engineer_max_tokens: u32,
}

impl Default for ImageGeneratorConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Square,
            edit_on_regenerate: true,
            engineer_temperature: 0.4,
            engineer_max_tokens: 2000,
        }
    }
}

impl ImageGeneratorConfig {
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_edit_on_regenerate(mut self, enabled: bool) -> Self {
        self.edit_on_regenerate = enabled;
        self
    }

    pub fn with_engineer_temperature(mut self, temperature: f64) -> Self {
        self.engineer_temperature = temperature.clamp(0.0, 2.0);
        self
    }
}

/// Image Generator Agent producing one image per question.
pub struct ImageGeneratorAgent {
    image_client: Arc<dyn ImageProvider>,
    prompt_engineer: Option<Arc<dyn LlmProvider>>,
    config: ImageGeneratorConfig,
}

impl std::fmt::Debug for ImageGeneratorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGeneratorAgent")
            .field("config", &self.config)
            .field("prompt_engineer", &self.prompt_engineer.is_some())
            .finish_non_exhaustive()
    }
}

impl ImageGeneratorAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "image_generator";

    pub fn new(image_client: Arc<dyn ImageProvider>, config: ImageGeneratorConfig) -> Self {
        Self {
            image_client,
            prompt_engineer: None,
            config,
        }
    }

    pub fn with_defaults(image_client: Arc<dyn ImageProvider>) -> Self {
        Self::new(image_client, ImageGeneratorConfig::default())
    }

    /// Enables the LLM prompt-engineer pass.
    pub fn with_prompt_engineer(mut self, llm_client: Arc<dyn LlmProvider>) -> Self {
        self.prompt_engineer = Some(llm_client);
        self
    }

    /// Generates a fresh image for `question`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::ImageGeneration` when the image provider fails.
    pub async fn generate(&self, question: &QuestionDraft) -> AgentResult<Vec<u8>> {
        let prompt = self.prompt_for(question).await;
        tracing::debug!(
            question_number = question.question_number,
            prompt_preview = %preview(&prompt, 120),
            "Generating image"
        );
        let image = self
            .image_client
            .generate_image(&prompt, self.config.aspect_ratio)
            .await?;
        tracing::info!(
            question_number = question.question_number,
            bytes = image.len(),
            "Image generated"
        );
        Ok(image)
    }

    /// Regenerates an image following validator corrections, editing
    /// `previous` when editing is enabled and an image exists.
    pub async fn regenerate(
        &self,
        question: &QuestionDraft,
        corrections: &str,
        previous: Option<&[u8]>,
    ) -> AgentResult<Vec<u8>> {
        let corrections = corrections.trim();
        if corrections.is_empty() {
            return self.generate(question).await;
        }

        let image = match previous.filter(|_| self.config.edit_on_regenerate) {
            Some(previous) => {
                tracing::info!(
                    question_number = question.question_number,
                    corrections = %preview(corrections, 100),
                    "Editing image with corrections"
                );
                let instructions = build_edit_instructions(question, corrections);
                self.image_client
                    .edit_image(previous, &instructions, self.config.aspect_ratio)
                    .await?
            }
            None => {
                tracing::info!(
                    question_number = question.question_number,
                    corrections = %preview(corrections, 100),
                    "Redrawing image with corrections"
                );
                let prompt = format!(
                    "{}\n\nMANDATORY CORRECTIONS FROM THE PREVIOUS ATTEMPT:\n{}",
                    self.prompt_for(question).await,
                    corrections
                );
                self.image_client
                    .generate_image(&prompt, self.config.aspect_ratio)
                    .await?
            }
        };
        Ok(image)
    }

    /// Engineered prompt when available, local prompt otherwise.
    async fn prompt_for(&self, question: &QuestionDraft) -> String {
        let Some(llm) = &self.prompt_engineer else {
            return build_image_prompt(question);
        };
        match self.engineer_prompt(llm.as_ref(), question).await {
            Ok(prompt) => prompt,
            Err(err) => {
                tracing::warn!(error = %err, "Prompt engineer failed, using local prompt");
                build_image_prompt(question)
            }
        }
    }

    async fn engineer_prompt(
        &self,
        llm: &dyn LlmProvider,
        question: &QuestionDraft,
    ) -> AgentResult<String> {
        let request = CompletionRequest::new(
            "",
            vec![
                Message::system(PROMPT_ENGINEER_SYSTEM_PROMPT),
                Message::user(build_image_prompt(question)),
            ],
        )
        .with_temperature(self.config.engineer_temperature)
        .with_max_tokens(self.config.engineer_max_tokens);

        let response = llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AgentError::ResponseParseError("Empty LLM response".to_string()))?;
        let parsed: EngineerResponse = parse_json_object(content)?;

        let prompt = parsed.image_prompt.trim();
        if prompt.is_empty() {
            return Err(AgentError::ResponseParseError(
                "prompt engineer returned an empty prompt".to_string(),
            ));
        }
        tracing::debug!(kind = %parsed.kind, "Prompt engineered");
        Ok(prompt.to_string())
    }
}

/// Builds the local image prompt for `question`.
pub fn build_image_prompt(question: &QuestionDraft) -> String {
    let kind = ImageKind::classify(question);
    let mut prompt = match kind {
        ImageKind::TechnicalDiagram => String::from(
            "Draw a clean technical diagram for a math assessment question: white background, \
             thin black lines, every vertex and segment labelled, right angles marked, \
             measures written exactly as given, unknown measures marked with \"?\".",
        ),
        ImageKind::Illustration => String::from(
            "Create an educational illustration for an assessment question: clear flat style, \
             legible labels, no decorative text, every element the question mentions drawn \
             in the exact quantity stated.",
        ),
    };

    prompt.push_str(&format!("\n\nTITLE: {}", question.title));
    if !question.text.trim().is_empty() {
        prompt.push_str(&format!("\nBASE TEXT: {}", preview(&question.text, 300)));
    }
    prompt.push_str(&format!("\nSTATEMENT: {}", question.question_statement));

    prompt.push_str("\nALTERNATIVES (depict every element they mention):");
    for alt in &question.alternatives {
        prompt.push_str(&format!("\n  {}) {}", alt.letter, alt.text));
    }

    if let Some(data) = &question.image_data {
        let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| format!("{:?}", data));
        prompt.push_str(&format!(
            "\nSTRUCTURED DATA (render every label and value exactly):\n{}",
            rendered
        ));
    }

    if let Some(correct) = question.correct_alternative() {
        prompt.push_str(&format!(
            "\n\nNEVER write, highlight or mark the answer \"{}\" in the image; the student must work it out.",
            correct.text
        ));
    }
    if !question.explanation_question.trim().is_empty() {
        prompt.push_str(&format!(
            "\nReasoning the image must support (do not draw it as text): {}",
            preview(&question.explanation_question, 300)
        ));
    }
    prompt
}

fn build_edit_instructions(question: &QuestionDraft, corrections: &str) -> String {
    format!(
        "Edit this image applying the following corrections:\n{}\n\n\
         Keep everything else unchanged. The image illustrates the question \"{}\" \
         and must not reveal its answer.",
        corrections, question.question_statement
    )
}

/// Response structure from the prompt-engineer LLM.
#[derive(Debug, Deserialize)]
struct EngineerResponse {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    image_prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::Alternative;
    use crate::error::{ImageError, LlmError};
    use crate::llm::{Choice, CompletionResponse, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingImageProvider {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageProvider for RecordingImageProvider {
        async fn generate_image(
            &self,
            prompt: &str,
            _aspect_ratio: AspectRatio,
        ) -> Result<Vec<u8>, ImageError> {
            if self.fail {
                return Err(ImageError::NoImageData);
            }
            self.calls.lock().expect("lock").push(format!("generate:{prompt}"));
            Ok(vec![0x89, 0x50])
        }

        async fn edit_image(
            &self,
            image: &[u8],
            instructions: &str,
            _aspect_ratio: AspectRatio,
        ) -> Result<Vec<u8>, ImageError> {
            self.calls.lock().expect("lock").push(format!("edit:{instructions}"));
            let mut edited = image.to_vec();
            edited.push(1);
            Ok(edited)
        }
    }

    struct MockLlmProvider {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, _: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                id: "mock".to_string(),
                model: "mock".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.response.clone()),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn question(statement: &str) -> QuestionDraft {
        QuestionDraft {
            question_number: 1,
            title: "Frutas da feira".to_string(),
            question_statement: statement.to_string(),
            alternatives: vec![
                Alternative {
                    letter: "A".to_string(),
                    text: "12 maçãs".to_string(),
                    distractor: None,
                    is_correct: true,
                },
                Alternative {
                    letter: "B".to_string(),
                    text: "8 peras".to_string(),
                    distractor: None,
                    is_correct: false,
                },
            ],
            correct_answer: "A".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_geometry() {
        assert_eq!(
            ImageKind::classify(&question("Qual a medida da hipotenusa do triângulo?")),
            ImageKind::TechnicalDiagram
        );
        assert_eq!(
            ImageKind::classify(&question("Qual fruta foi mais vendida?")),
            ImageKind::Illustration
        );
    }

    #[test]
    fn test_prompt_lists_alternatives_and_guards_answer() {
        let prompt = build_image_prompt(&question("Qual fruta foi mais vendida?"));
        assert!(prompt.contains("A) 12 maçãs"));
        assert!(prompt.contains("B) 8 peras"));
        assert!(prompt.contains("NEVER write, highlight or mark the answer \"12 maçãs\""));
    }

    #[tokio::test]
    async fn test_regenerate_edits_previous_image() {
        let provider = Arc::new(RecordingImageProvider::default());
        let agent = ImageGeneratorAgent::with_defaults(provider.clone());
        let image = agent
            .regenerate(&question("Q"), "Add the y-axis values", Some(&[7, 7]))
            .await
            .expect("edit should succeed");
        assert_eq!(image, vec![7, 7, 1]);
        let calls = provider.calls.lock().expect("lock");
        assert!(calls[0].starts_with("edit:"));
        assert!(calls[0].contains("Add the y-axis values"));
    }

    #[tokio::test]
    async fn test_regenerate_redraws_when_editing_disabled() {
        let provider = Arc::new(RecordingImageProvider::default());
        let agent = ImageGeneratorAgent::new(
            provider.clone(),
            ImageGeneratorConfig::default().with_edit_on_regenerate(false),
        );
        agent
            .regenerate(&question("Q"), "Use four bars", Some(&[7]))
            .await
            .expect("redraw should succeed");
        let calls = provider.calls.lock().expect("lock");
        assert!(calls[0].starts_with("generate:"));
        assert!(calls[0].contains("MANDATORY CORRECTIONS"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_image_generation_error() {
        let agent = ImageGeneratorAgent::with_defaults(Arc::new(RecordingImageProvider {
            fail: true,
            ..Default::default()
        }));
        assert!(matches!(
            agent.generate(&question("Q")).await,
            Err(AgentError::ImageGeneration(_))
        ));
    }

    #[tokio::test]
    async fn test_prompt_engineer_used_and_falls_back() {
        let provider = Arc::new(RecordingImageProvider::default());
        let agent = ImageGeneratorAgent::with_defaults(provider.clone()).with_prompt_engineer(
            Arc::new(MockLlmProvider {
                response: r#"{"kind": "illustration", "image_prompt": "A market stall with 12 apples"}"#
                    .to_string(),
            }),
        );
        agent.generate(&question("Q")).await.expect("generate");

        let fallback = ImageGeneratorAgent::with_defaults(provider.clone())
            .with_prompt_engineer(Arc::new(MockLlmProvider {
                response: "no json here".to_string(),
            }));
        fallback.generate(&question("Q")).await.expect("generate");

        let calls = provider.calls.lock().expect("lock");
        assert_eq!(calls[0], "generate:A market stall with 12 apples");
        assert!(calls[1].contains("ALTERNATIVES"));
    }
}
