//! Question Generator Agent.
//!
//! Produces a batch of multiple-choice questions from a parameterized prompt.
//! The prompt template is chosen by a small decision table (feedback first,
//! then authenticity), the image-dependency mode injects one of three
//! mutually exclusive instruction blocks, and retrieved source texts and
//! reviewer feedback are appended when present.

use std::sync::Arc;

use serde::Deserialize;

use super::error::{AgentError, AgentResult};
use super::types::{GenerationRequest, ImageDependency, QuestionDraft, SourceText};
use crate::llm::{CompletionRequest, LlmProvider, Message};
use crate::utils::json_extraction::{extract_json_object, preview, JsonExtractionResult};

/// System prompt for question generation.
const GENERATOR_SYSTEM_PROMPT: &str = r#"You are an experienced writer of large-scale assessment items for Brazilian basic education (BNCC). You write original multiple-choice questions that measure exactly one skill at exactly one proficiency level.

Every question has a base text, a statement, the requested number of alternatives, exactly one correct alternative, and a distractor rationale for every alternative explaining the misconception it captures.

You MUST respond with ONLY a valid JSON object in this exact format:
{
  "questions": [
    {
      "question_number": <integer starting at 1>,
      "id_skill": "<skill code>",
      "skill": "<skill description>",
      "proficiency_level": "<level>",
      "proficiency_description": "<what a student at this level can do>",
      "title": "<title of the base text>",
      "text": "<base text>",
      "source": "<provenance of the base text>",
      "source_url": "<url or null>",
      "source_author": "<author or null>",
      "question_statement": "<statement>",
      "alternatives": [
        {"letter": "A", "text": "<option>", "distractor": "<rationale>", "is_correct": <true|false>}
      ],
      "correct_answer": "<letter of the correct alternative>",
      "explanation_question": "<why the correct answer is correct>",
      "image_data": <object or null>
    }
  ]
}"#;

/// Template for a first attempt with an author-written base text.
const STANDARD_TEMPLATE: &str = r#"Write {count_questions} question(s) for the {evaluation_model} assessment model.

Skill: {skill}
Proficiency level: {proficiency_level}
Grade: {grade}
Curriculum component: {curriculum_component}
Alternatives per question: {count_alternatives} (letters {letters})

Write an original base text for each question, suited to the grade. Set "source" to "Autoral" and leave "source_url" and "source_author" null."#;

/// Template for a first attempt grounded on authentic published texts.
const AUTHENTIC_TEMPLATE: &str = r#"Write {count_questions} question(s) for the {evaluation_model} assessment model.

Skill: {skill}
Proficiency level: {proficiency_level}
Grade: {grade}
Curriculum component: {curriculum_component}
Alternatives per question: {count_alternatives} (letters {letters})

Base every question on an AUTHENTIC text by a real author (literature, journalism, public-domain works). Never invent a text and attribute it to someone. Fill "source", "source_url" and "source_author" with the real provenance."#;

/// Template for a regeneration attempt after a rejected review.
const CORRECTIVE_TEMPLATE: &str = r#"Your previous batch was REJECTED by the pedagogical reviewer. Write a new batch of {count_questions} question(s) for the {evaluation_model} assessment model that fixes every deficiency listed in the reviewer feedback below.

Skill: {skill}
Proficiency level: {proficiency_level}
Grade: {grade}
Curriculum component: {curriculum_component}
Alternatives per question: {count_alternatives} (letters {letters})

Do not repeat the rejected questions. Keep what the reviewer did not criticize."#;

/// Instructions when no image may be involved.
const IMAGE_NONE_BLOCK: &str = r#"IMAGE POLICY: NONE.
- Do not reference any figure, chart, comic strip or image.
- Do not write placeholders such as "[IMAGE: ...]".
- Everything the student needs must be written in the "text" field.
- Set "image_data" to null."#;

/// Instructions when images are decorative.
const IMAGE_OPTIONAL_BLOCK: &str = r#"IMAGE POLICY: OPTIONAL.
- Questions may come with a decorative illustration.
- Solving the question must NOT depend on the image; all data stays in the text.
- "image_data" may describe a decorative illustration or be null."#;

/// Instructions when the image carries the data needed to answer.
const IMAGE_REQUIRED_BLOCK: &str = r#"IMAGE POLICY: REQUIRED.
- The question must be unanswerable without looking at the image.
- Keep "text" short (e.g. "Observe the chart below.") and NEVER describe the image in the text, statement or alternatives; another model will draw it later.
- The statement must demand visual analysis ("According to the chart...", "Observing the figure...").
- Every question MUST include an "image_data" object with everything the illustrator needs: "type" (bar_chart, pie_chart, line_chart, table, geometric_figure, map, scene), "title", "labels", "values", "units" and any measures.
- Counts, labels and values in "image_data" must match the statement exactly, percentages must add up to 100, and the correct alternative must follow from the data."#;

/// Heading placed before retrieved texts.
const SOURCE_TEXTS_HEADING: &str = "AUTHENTIC SOURCE TEXTS (use one per question as the base text, quoting it faithfully and citing its provenance):";

/// Heading placed before reviewer feedback.
const FEEDBACK_HEADING: &str = "REVIEWER FEEDBACK TO ADDRESS:";

/// Prompt template chosen for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Regeneration after a rejected review.
    Corrective,
    /// Authentic published texts as base texts.
    Authentic,
    /// Author-written base texts.
    Standard,
}

impl PromptTemplate {
    /// Decision table: feedback wins, then the authentic flag, else standard.
    pub fn select(request: &GenerationRequest, has_feedback: bool) -> Self {
        if has_feedback {
            Self::Corrective
        } else if request.authentic {
            Self::Authentic
        } else {
            Self::Standard
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Self::Corrective => CORRECTIVE_TEMPLATE,
            Self::Authentic => AUTHENTIC_TEMPLATE,
            Self::Standard => STANDARD_TEMPLATE,
        }
    }

    /// Short label for logs and progress events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Corrective => "corrective",
            Self::Authentic => "authentic",
            Self::Standard => "standard",
        }
    }
}

/// Instruction block for an image-dependency mode.
pub fn image_instructions(mode: ImageDependency) -> &'static str {
    match mode {
        ImageDependency::None => IMAGE_NONE_BLOCK,
        ImageDependency::Optional => IMAGE_OPTIONAL_BLOCK,
        ImageDependency::Required => IMAGE_REQUIRED_BLOCK,
    }
}

/// Configuration for the Question Generator Agent.
#[derive(Debug, Clone)]
pub struct QuestionGeneratorConfig {
    /// Temperature for LLM generation.
    pub temperature: f64,
    /// Maximum tokens for LLM response.
    pub max_tokens: u32,
    /// Longest source-text body injected into the prompt, in characters.
    pub max_source_chars: usize,
}

impl Default for QuestionGeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 8000,
            max_source_chars: 1500,
        }
    }
}

impl QuestionGeneratorConfig {
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

    /// Sets the longest injected source-text body.
    pub fn with_max_source_chars(mut self, max_source_chars: usize) -> Self {
        self.max_source_chars = max_source_chars;
        self
    }
}

/// Question Generator Agent that writes question batches with an LLM.
pub struct QuestionGeneratorAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: QuestionGeneratorConfig,
}

impl std::fmt::Debug for QuestionGeneratorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionGeneratorAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QuestionGeneratorAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "question_generator";

    /// Creates a new question generator agent.
    pub fn new(llm_client: Arc<dyn LlmProvider>, config: QuestionGeneratorConfig) -> Self {
        Self { llm_client, config }
    }

    /// Creates a new question generator with default configuration.
    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, QuestionGeneratorConfig::default())
    }

    /// Generates a batch of questions.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::QuestionGeneration` when the response holds no
    /// usable question, `AgentError::ResponseParseError` when no JSON object
    /// can be extracted, and `AgentError::LlmError` on provider failure.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        source_texts: Option<&[SourceText]>,
        feedback: Option<&str>,
    ) -> AgentResult<Vec<QuestionDraft>> {
        let template = PromptTemplate::select(request, feedback.is_some());
        let prompt = self.build_prompt(request, source_texts, feedback);

        tracing::info!(
            template = template.label(),
            image_dependency = %request.image_dependency,
            source_texts = source_texts.map_or(0, |t| t.len()),
            "Generating question batch"
        );

        let llm_request = CompletionRequest::new(
            "",
            vec![
                Message::system(GENERATOR_SYSTEM_PROMPT),
                Message::user(prompt),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm_client.generate(llm_request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| AgentError::ResponseParseError("Empty LLM response".to_string()))?;

        self.parse_response(content, request)
    }

    /// Builds the user prompt for an attempt.
    pub fn build_prompt(
        &self,
        request: &GenerationRequest,
        source_texts: Option<&[SourceText]>,
        feedback: Option<&str>,
    ) -> String {
        let template = PromptTemplate::select(request, feedback.is_some());
        let component = if request.curriculum_component.trim().is_empty() {
            "(not specified)"
        } else {
            request.curriculum_component.as_str()
        };

        let mut prompt = template
            .body()
            .replace("{count_questions}", &request.count_questions.to_string())
            .replace("{count_alternatives}", &request.count_alternatives.to_string())
            .replace("{letters}", &request.alternative_letters().join(", "))
            .replace("{skill}", &request.skill)
            .replace("{proficiency_level}", &request.proficiency_level)
            .replace("{grade}", &request.grade)
            .replace("{curriculum_component}", component)
            .replace("{evaluation_model}", request.evaluation_model.as_str());

        prompt.push_str("\n\n");
        prompt.push_str(image_instructions(request.image_dependency));

        if let Some(texts) = source_texts.filter(|t| !t.is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(&self.format_source_texts(texts, request.count_questions as usize));
        }

        if let Some(feedback) = feedback {
            prompt.push_str("\n\n");
            prompt.push_str(FEEDBACK_HEADING);
            prompt.push('\n');
            prompt.push_str(feedback.trim());
        }

        prompt
    }

    fn format_source_texts(&self, texts: &[SourceText], limit: usize) -> String {
        let mut block = String::from(SOURCE_TEXTS_HEADING);
        for (i, t) in texts.iter().take(limit).enumerate() {
            let body = preview(&t.text, self.config.max_source_chars);
            block.push_str(&format!(
                "\n\nTEXT {}: \"{}\" by {} ({}, {})\n{}",
                i + 1,
                t.title,
                if t.author.is_empty() { "unknown author" } else { &t.author },
                t.source_name,
                t.source_url,
                body
            ));
        }
        block
    }

    /// Parses the LLM response into normalized question drafts.
    fn parse_response(
        &self,
        content: &str,
        request: &GenerationRequest,
    ) -> AgentResult<Vec<QuestionDraft>> {
        let json = self.extract_json(content)?;
        let parsed: GeneratorResponse = serde_json::from_str(&json)
            .map_err(|e| AgentError::ResponseParseError(format!("Invalid question JSON: {}", e)))?;

        let mut questions = Vec::with_capacity(parsed.questions.len());
        for (position, mut question) in parsed.questions.into_iter().enumerate() {
            if question.skill.trim().is_empty() {
                question.skill = request.skill.clone();
            }
            if question.proficiency_level.trim().is_empty() {
                question.proficiency_level = request.proficiency_level.clone();
            }
            match question.normalize(position) {
                Ok(()) => {
                    if request.image_dependency == ImageDependency::Required
                        && question.image_data.is_none()
                    {
                        tracing::warn!(
                            question_number = question.question_number,
                            "Image-dependent question has no image_data"
                        );
                    }
                    questions.push(question);
                }
                Err(err) => tracing::warn!(error = %err, "Discarding invalid generated question"),
            }
        }

        if questions.is_empty() {
            return Err(AgentError::QuestionGeneration(
                "response contained no valid question".to_string(),
            ));
        }

        if questions.len() > request.count_questions as usize {
            tracing::debug!(
                returned = questions.len(),
                requested = request.count_questions,
                "Model returned extra questions, truncating"
            );
            questions.truncate(request.count_questions as usize);
        }

        Ok(questions)
    }

    /// Extracts the first JSON object, mapping failures to parse errors.
    fn extract_json(&self, content: &str) -> AgentResult<String> {
        match extract_json_object(content) {
            JsonExtractionResult::Success(json) => Ok(json),
            JsonExtractionResult::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => {
                let partial = preview(&partial_json, 200);
                tracing::warn!(
                    unclosed_braces = unclosed_braces,
                    unclosed_brackets = unclosed_brackets,
                    partial_preview = %partial,
                    "generator reply ends mid-object"
                );
                Err(AgentError::ResponseParseError(format!(
                    "question batch cut off with {} open braces and {} open brackets",
                    unclosed_braces, unclosed_brackets
                )))
            }
            JsonExtractionResult::NotFound { content_preview } => {
                tracing::warn!(content_preview = %content_preview, "Could not find JSON in generator response");
                Err(AgentError::ResponseParseError(format!(
                    "no question batch object in reply: '{}'",
                    content_preview
                )))
            }
        }
    }
}

/// Response structure from LLM question generation.
#[derive(Debug, Deserialize)]
struct GeneratorResponse {
    #[serde(default)]
    questions: Vec<QuestionDraft>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, CompletionResponse, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock LLM provider recording the last prompt.
    struct MockLlmProvider {
        response: Mutex<String>,
        last_prompt: Mutex<Option<String>>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(response.into()),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_prompt.lock().expect("lock not poisoned") =
                request.messages.last().map(|m| m.content.clone());
            let content = self.response.lock().expect("lock not poisoned").clone();
            Ok(CompletionResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    const ONE_QUESTION: &str = r#"Here is the batch:
```json
{"questions": [{
  "question_number": 1,
  "id_skill": "D1",
  "skill": "Localizar informações explícitas",
  "proficiency_level": "2",
  "title": "O Leão e o Rato",
  "text": "Um rato acordou um leão {de propósito?}",
  "source": "Esopo",
  "question_statement": "Quem ajudou o leão?",
  "alternatives": [
    {"letter": "A", "text": "O rato", "distractor": "Correta"},
    {"letter": "B", "text": "O caçador", "distractor": "Confunde personagens"},
    {"letter": "C", "text": "A raposa", "distractor": "Personagem de outra fábula"},
    {"letter": "D", "text": "Ninguém", "distractor": "Leitura desatenta"}
  ],
  "correct_answer": "A",
  "explanation_question": "O rato roeu a rede."
}]}
```
Good luck!"#;

    #[test]
    fn test_template_decision_table() {
        let request = GenerationRequest::new("D1", "2", "5");
        assert_eq!(PromptTemplate::select(&request, false), PromptTemplate::Standard);
        assert_eq!(PromptTemplate::select(&request, true), PromptTemplate::Corrective);

        let authentic = request.with_authentic(true);
        assert_eq!(PromptTemplate::select(&authentic, false), PromptTemplate::Authentic);
        assert_eq!(PromptTemplate::select(&authentic, true), PromptTemplate::Corrective);
    }

    #[test]
    fn test_image_blocks_are_mutually_exclusive() {
        let agent = QuestionGeneratorAgent::with_defaults(Arc::new(MockLlmProvider::new("")));
        for mode in [
            ImageDependency::None,
            ImageDependency::Optional,
            ImageDependency::Required,
        ] {
            let request = GenerationRequest::new("D1", "2", "5").with_image_dependency(mode);
            let prompt = agent.build_prompt(&request, None, None);
            let blocks = [IMAGE_NONE_BLOCK, IMAGE_OPTIONAL_BLOCK, IMAGE_REQUIRED_BLOCK];
            let present: Vec<_> = blocks.iter().filter(|b| prompt.contains(*b)).collect();
            assert_eq!(present.len(), 1, "exactly one block for {mode}");
            assert!(prompt.contains(image_instructions(mode)));
        }
    }

    #[test]
    fn test_prompt_injects_texts_and_feedback() {
        let agent = QuestionGeneratorAgent::new(
            Arc::new(MockLlmProvider::new("")),
            QuestionGeneratorConfig::default().with_max_source_chars(10),
        );
        let request = GenerationRequest::new("D1", "2", "5").with_count_questions(1);
        let texts = vec![
            SourceText {
                text: "0123456789ABCDEF".to_string(),
                title: "Primeiro".to_string(),
                author: "Autor".to_string(),
                source_url: "https://a".to_string(),
                source_name: "Fonte".to_string(),
            },
            SourceText {
                text: "ignored".to_string(),
                title: "Segundo".to_string(),
                author: String::new(),
                source_url: String::new(),
                source_name: String::new(),
            },
        ];

        let prompt = agent.build_prompt(&request, Some(&texts), Some("Distractors are weak."));
        assert!(prompt.contains("Primeiro"));
        assert!(prompt.contains("0123456789"));
        assert!(!prompt.contains("0123456789A"));
        assert!(!prompt.contains("Segundo"));
        assert!(prompt.contains(FEEDBACK_HEADING));
        assert!(prompt.contains("Distractors are weak."));
        assert!(prompt.contains("REJECTED"));
    }

    #[tokio::test]
    async fn test_generate_parses_noisy_response() {
        let mock = Arc::new(MockLlmProvider::new(ONE_QUESTION));
        let agent = QuestionGeneratorAgent::with_defaults(mock.clone());
        let request = GenerationRequest::new("D1", "2", "5");

        let questions = agent
            .generate(&request, None, None)
            .await
            .expect("generation should succeed");

        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.correct_answer, "A");
        assert_eq!(q.alternatives.iter().filter(|a| a.is_correct).count(), 1);
        assert!(q.alternatives[0].is_correct);
        assert_eq!(q.proficiency_level, "2");

        let prompt = mock.last_prompt.lock().expect("lock").clone().expect("prompt sent");
        assert!(prompt.contains("Skill: D1"));
    }

    #[tokio::test]
    async fn test_generate_rejects_unparsable_output() {
        let agent =
            QuestionGeneratorAgent::with_defaults(Arc::new(MockLlmProvider::new("Sorry, I can't.")));
        let request = GenerationRequest::new("D1", "2", "5");
        assert!(matches!(
            agent.generate(&request, None, None).await,
            Err(AgentError::ResponseParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_discards_invalid_questions() {
        let response = r#"{"questions": [
            {"question_statement": "Q1", "alternatives": [{"letter": "A", "text": "x", "is_correct": true}, {"letter": "B", "text": "y", "is_correct": true}]},
            {"question_statement": "Q2", "alternatives": [{"letter": "A", "text": "x"}, {"letter": "B", "text": "y"}], "correct_answer": "B"}
        ]}"#;
        let agent = QuestionGeneratorAgent::with_defaults(Arc::new(MockLlmProvider::new(response)));
        let request = GenerationRequest::new("D1", "2", "5").with_count_questions(2);

        let questions = agent.generate(&request, None, None).await.expect("one valid question");
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question_statement, "Q2");
        assert_eq!(questions[0].question_number, 2);
        assert_eq!(questions[0].skill, "D1");
    }

    #[tokio::test]
    async fn test_generate_empty_batch_is_generation_error() {
        let agent =
            QuestionGeneratorAgent::with_defaults(Arc::new(MockLlmProvider::new(r#"{"questions": []}"#)));
        let request = GenerationRequest::new("D1", "2", "5");
        assert!(matches!(
            agent.generate(&request, None, None).await,
            Err(AgentError::QuestionGeneration(_))
        ));
    }
}
