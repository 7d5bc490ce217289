//! The question generation graph.
//!
//! ```text
//! START -> SEARCH? -> GENERATE -> REVIEW --(below threshold, budget left)--> GENERATE
//!                                    |
//!                                    +--(images required)--> IMAGE_GENERATE -> IMAGE_VALIDATE
//!                                    |                              ^              |
//!                                    |                              +- IMAGE_RETRY <+ (invalid, budget left)
//!                                    +--> END
//! ```
//!
//! Nodes run strictly one after another. Each node reads the state, calls its
//! agent, and returns a [`NodeUpdate`]; the graph merges it with
//! [`OrchestrationState::apply`] and picks the next node with the routing
//! functions below. Agent failures become state fields, never graph errors.

use std::sync::Arc;
use std::time::Instant;

use super::config::PipelineConfig;
use super::error::GraphError;
use super::progress::ProgressReporter;
use super::result::{GenerationOutcome, GraphNode};
use super::state::{NodeUpdate, OrchestrationState};
use crate::agents::{
    invalid_indices, GateDecision, GenerationRequest, ImageDependency, ImageGeneratorAgent,
    ImageGeneratorConfig, ImageQualityGate, ImageResult, ImageValidatorAgent, ImageVerdict,
    QualityGate, QualityReviewerAgent,
    QualityReviewerConfig, QuestionGeneratorAgent, QuestionGeneratorConfig, SourceTextProvider,
    TextSearchAgent, ValidationStatus, GENERIC_CORRECTION,
};
use crate::llm::{ImageProvider, LlmProvider, VisionProvider};

/// Default limit on node executions per run.
pub const DEFAULT_MAX_STEPS: usize = 64;

/// First node of a run.
pub fn route_start(state: &OrchestrationState) -> GraphNode {
    if state.request.use_real_text {
        GraphNode::Search
    } else {
        GraphNode::Generate
    }
}

/// Next node after a review: another attempt, the image phase, or the end.
pub fn route_after_review(state: &OrchestrationState, gate: &QualityGate) -> Option<GraphNode> {
    let score = state.quality_score.unwrap_or(0.0);
    match gate.decide(score, state.retry_count, state.error.as_deref()) {
        GateDecision::Regenerate => Some(GraphNode::Generate),
        GateDecision::Finish => route_on_image(state),
    }
}

/// Enters the image phase only when images are required and questions exist.
pub fn route_on_image(state: &OrchestrationState) -> Option<GraphNode> {
    if state.request.image_dependency == ImageDependency::Required && !state.questions.is_empty() {
        Some(GraphNode::ImageGenerate)
    } else {
        None
    }
}

/// Next node after image validation.
pub fn route_after_image_validation(
    state: &OrchestrationState,
    gate: &ImageQualityGate,
) -> Option<GraphNode> {
    let results = state.image_results.as_deref().unwrap_or_default();
    match gate.decide(results, state.image_retry_count) {
        GateDecision::Regenerate => Some(GraphNode::ImageRetry),
        GateDecision::Finish => None,
    }
}

/// Orchestrates the agents of one generation run.
///
/// The graph holds only shared, stateless agents; every run owns its own
/// [`OrchestrationState`], so one graph can serve concurrent runs.
pub struct QuestionGraph {
    searcher: Option<TextSearchAgent>,
    generator: QuestionGeneratorAgent,
    reviewer: QualityReviewerAgent,
    image_generator: Option<ImageGeneratorAgent>,
    image_validator: Option<ImageValidatorAgent>,
    quality_gate: QualityGate,
    image_gate: ImageQualityGate,
    max_steps: usize,
}

impl std::fmt::Debug for QuestionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionGraph")
            .field("searcher", &self.searcher.is_some())
            .field("image_agents", &self.image_generator.is_some())
            .field("quality_gate", &self.quality_gate)
            .field("image_gate", &self.image_gate)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl QuestionGraph {
    /// Creates a text-only graph with default gates.
    pub fn new(generator: QuestionGeneratorAgent, reviewer: QualityReviewerAgent) -> Self {
        Self {
            searcher: None,
            generator,
            reviewer,
            image_generator: None,
            image_validator: None,
            quality_gate: QualityGate::default(),
            image_gate: ImageQualityGate::default(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Builds the full graph from configuration and shared providers.
    pub fn from_config(
        config: &PipelineConfig,
        llm_client: Arc<dyn LlmProvider>,
        image_client: Option<Arc<dyn ImageProvider>>,
        vision_client: Option<Arc<dyn VisionProvider>>,
        text_provider: Option<Arc<dyn SourceTextProvider>>,
    ) -> Self {
        let generator = QuestionGeneratorAgent::new(
            Arc::clone(&llm_client),
            QuestionGeneratorConfig::default().with_temperature(config.question_llm.temperature),
        );
        let reviewer = QualityReviewerAgent::new(
            Arc::clone(&llm_client),
            QualityReviewerConfig::default()
                .with_threshold(config.quality_threshold)
                .with_failure_policy(config.review_failure_policy()),
        );

        let mut graph = Self::new(generator, reviewer)
            .with_quality_gate(QualityGate::new(config.quality_threshold, config.max_retries))
            .with_image_gate(ImageQualityGate::new(config.image_max_retries))
            .with_max_steps(config.max_graph_steps);

        if let Some(provider) = text_provider {
            graph = graph.with_searcher(TextSearchAgent::new(provider));
        }

        if let (Some(image_client), Some(vision_client)) = (image_client, vision_client) {
            let mut image_generator = ImageGeneratorAgent::new(
                image_client,
                ImageGeneratorConfig::default()
                    .with_aspect_ratio(config.image_aspect_ratio)
                    .with_edit_on_regenerate(config.edit_images_on_retry),
            );
            if config.use_prompt_engineer {
                image_generator = image_generator.with_prompt_engineer(llm_client);
            }
            graph = graph.with_image_agents(image_generator, ImageValidatorAgent::new(vision_client));
        }

        graph
    }

    pub fn with_searcher(mut self, searcher: TextSearchAgent) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_image_agents(
        mut self,
        generator: ImageGeneratorAgent,
        validator: ImageValidatorAgent,
    ) -> Self {
        self.image_generator = Some(generator);
        self.image_validator = Some(validator);
        self
    }

    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.quality_gate = gate;
        self
    }

    pub fn with_image_gate(mut self, gate: ImageQualityGate) -> Self {
        self.image_gate = gate;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Approval threshold of the text gate.
    pub fn quality_threshold(&self) -> f64 {
        self.quality_gate.threshold
    }

    /// Runs the graph to completion without progress reporting.
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationOutcome, GraphError> {
        self.drive(request, &ProgressReporter::disabled()).await
    }

    /// Runs the graph, then sends the terminal `finished` or `error` event.
    pub async fn run_streaming(
        &self,
        request: GenerationRequest,
        reporter: &ProgressReporter,
    ) -> Result<GenerationOutcome, GraphError> {
        match self.drive(request, reporter).await {
            Ok(outcome) => {
                let value = match serde_json::to_value(&outcome) {
                    Ok(value) => value,
                    Err(err) => {
                        reporter.fail(format!("Failed to serialize result: {}", err));
                        return Err(err.into());
                    }
                };
                reporter.finish(value);
                Ok(outcome)
            }
            Err(err) => {
                reporter.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// Runs every node of the graph and returns the outcome. Emits phase,
    /// log, metric and retry events, but never a terminal event.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::InvalidRequest` before any node runs,
    /// `GraphError::StepLimitExceeded` if routing fails to terminate, and
    /// the state errors of [`OrchestrationState::apply`].
    pub async fn drive(
        &self,
        request: GenerationRequest,
        reporter: &ProgressReporter,
    ) -> Result<GenerationOutcome, GraphError> {
        request
            .validate()
            .map_err(|e| GraphError::InvalidRequest(e.to_string()))?;

        let started = Instant::now();
        tracing::info!(
            skill = %request.skill,
            level = %request.proficiency_level,
            grade = %request.grade,
            count_questions = request.count_questions,
            image_dependency = %request.image_dependency,
            "Starting question generation run"
        );

        let mut state = OrchestrationState::new(request);
        let mut path = Vec::new();
        let mut next = Some(route_start(&state));

        while let Some(node) = next {
            if path.len() >= self.max_steps {
                tracing::error!(limit = self.max_steps, "Graph step limit exceeded");
                return Err(GraphError::StepLimitExceeded {
                    limit: self.max_steps,
                });
            }
            path.push(node);
            tracing::debug!(node = %node, phase = ?node.phase(), "Entering node");

            let update = self.execute(node, &state, reporter).await;
            state.apply(update)?;

            next = self.route(node, &state);
            if node == GraphNode::Review && next == Some(GraphNode::Generate) {
                reporter.retry(
                    state.retry_count + 1,
                    format!(
                        "quality score {:.2} below threshold {:.2}",
                        state.quality_score.unwrap_or(0.0),
                        self.quality_gate.threshold
                    ),
                );
            }
        }

        let outcome = GenerationOutcome::from_state(
            state,
            path,
            started.elapsed(),
            self.quality_gate.threshold,
        );
        tracing::info!(
            questions = outcome.questions.len(),
            quality_score = outcome.quality_score,
            retry_count = outcome.retry_count,
            image_retry_count = outcome.image_retry_count,
            manual_images = outcome.manual_image_count(),
            phase = ?outcome.phase,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Question generation run finished"
        );
        Ok(outcome)
    }

    fn route(&self, node: GraphNode, state: &OrchestrationState) -> Option<GraphNode> {
        match node {
            GraphNode::Search => Some(GraphNode::Generate),
            GraphNode::Generate => Some(GraphNode::Review),
            GraphNode::Review => route_after_review(state, &self.quality_gate),
            GraphNode::ImageGenerate => Some(GraphNode::ImageValidate),
            GraphNode::ImageValidate => route_after_image_validation(state, &self.image_gate),
            GraphNode::ImageRetry => Some(GraphNode::ImageGenerate),
        }
    }

    async fn execute(
        &self,
        node: GraphNode,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        match node {
            GraphNode::Search => self.search_node(state, reporter).await,
            GraphNode::Generate => self.generate_node(state, reporter).await,
            GraphNode::Review => self.review_node(state, reporter).await,
            GraphNode::ImageGenerate => self.image_generate_node(state, reporter).await,
            GraphNode::ImageValidate => self.image_validate_node(state, reporter).await,
            GraphNode::ImageRetry => self.image_retry_node(state, reporter),
        }
    }

    async fn search_node(
        &self,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        let id = GraphNode::Search.as_str();
        reporter.phase_start(id, "Searching source texts");

        let Some(searcher) = &self.searcher else {
            reporter.phase_end(id, "no text provider configured");
            return NodeUpdate::Search { source_texts: None };
        };

        let source_texts = match searcher.search(&state.request).await {
            Ok(texts) if texts.is_empty() => {
                reporter.log(id, "No source texts found, generating without them");
                None
            }
            Ok(texts) => Some(texts),
            Err(err) => {
                tracing::warn!(error = %err, "Text search failed, continuing without source texts");
                reporter.log(id, format!("Text search failed: {}", err));
                None
            }
        };

        let found = source_texts.as_ref().map_or(0, Vec::len);
        reporter.metric(id, "texts_found", found);
        reporter.phase_end(id, format!("{} source texts", found));
        NodeUpdate::Search { source_texts }
    }

    async fn generate_node(
        &self,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        let id = GraphNode::Generate.as_str();
        let attempt = state.retry_count + 1;
        reporter.phase_start(id, &format!("Generating questions (attempt {})", attempt));

        let result = self
            .generator
            .generate(
                &state.request,
                state.source_texts.as_deref(),
                state.revision_feedback.as_deref(),
            )
            .await;

        match result {
            Ok(questions) => {
                reporter.metric(id, "questions", questions.len());
                reporter.phase_end(id, format!("{} questions generated", questions.len()));
                NodeUpdate::Generate {
                    questions,
                    retry_count: attempt,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "Question generation attempt failed");
                reporter.log(id, format!("Generation failed: {}", err));
                reporter.phase_end(id, "no usable questions");
                NodeUpdate::Generate {
                    questions: Vec::new(),
                    retry_count: attempt,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn review_node(
        &self,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        let id = GraphNode::Review.as_str();
        reporter.phase_start(id, "Reviewing question quality");

        let verdict = self.reviewer.review(&state.request, &state.questions).await;
        if let Some(error) = &verdict.error {
            reporter.log(
                id,
                format!(
                    "Review unavailable ({}), applying failure policy score {:.2}",
                    error, verdict.overall_score
                ),
            );
        }

        reporter.metric(id, "quality_score", format!("{:.2}", verdict.overall_score));
        reporter.phase_end(
            id,
            if verdict.approved {
                format!("approved with score {:.2}", verdict.overall_score)
            } else {
                format!("rejected with score {:.2}", verdict.overall_score)
            },
        );

        NodeUpdate::Review {
            quality_score: verdict.overall_score,
            revision_feedback: if verdict.approved { None } else { verdict.feedback },
            error: verdict.error,
        }
    }

    async fn image_generate_node(
        &self,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        let id = GraphNode::ImageGenerate.as_str();
        let regenerating = state.image_results.is_some();
        reporter.phase_start(
            id,
            if regenerating {
                "Regenerating rejected images"
            } else {
                "Generating images"
            },
        );

        let mut image_results = Vec::with_capacity(state.questions.len());
        let mut produced = 0usize;

        // One image at a time, in question order.
        for (idx, question) in state.questions.iter().enumerate() {
            let previous = state.image_result(idx);
            if let Some(previous) = previous {
                if previous.validation_status != ValidationStatus::Invalid {
                    image_results.push(previous.clone());
                    continue;
                }
            }
            let attempts = previous.map_or(0, |p| p.attempts) + 1;

            let Some(generator) = &self.image_generator else {
                image_results.push(ImageResult::failed(idx, attempts, "no image provider configured"));
                continue;
            };

            let result = match previous {
                Some(previous) => {
                    let corrections = previous.corrections.as_deref().unwrap_or(GENERIC_CORRECTION);
                    generator
                        .regenerate(question, corrections, previous.image.as_deref())
                        .await
                }
                None => generator.generate(question).await,
            };

            match result {
                Ok(bytes) => {
                    produced += 1;
                    reporter.log(
                        id,
                        format!("Image for question {} generated (attempt {})", idx + 1, attempts),
                    );
                    image_results.push(ImageResult::pending(idx, bytes, attempts));
                }
                Err(err) => {
                    tracing::warn!(question_index = idx, error = %err, "Image generation failed");
                    reporter.log(id, format!("Image for question {} failed: {}", idx + 1, err));
                    image_results.push(ImageResult::failed(idx, attempts, err.to_string()));
                }
            }
        }

        reporter.metric(id, "images_generated", produced);
        reporter.phase_end(id, format!("{} images generated", produced));
        NodeUpdate::ImageGenerate { image_results }
    }

    async fn image_validate_node(
        &self,
        state: &OrchestrationState,
        reporter: &ProgressReporter,
    ) -> NodeUpdate {
        let id = GraphNode::ImageValidate.as_str();
        reporter.phase_start(id, "Validating images");

        let mut image_results = Vec::new();
        for mut result in state.image_results.clone().unwrap_or_default() {
            if result.validation_status != ValidationStatus::Pending {
                image_results.push(result);
                continue;
            }
            let idx = result.question_index;
            let verdict = match (&self.image_validator, state.questions.get(idx), &result.image) {
                (Some(validator), Some(question), Some(image)) => {
                    validator.validate(question, image).await
                }
                (None, _, _) => ImageVerdict::rejected("no image validator configured"),
                _ => ImageVerdict::rejected("image or question missing"),
            };

            result.score = Some(verdict.score);
            result.issues = verdict.issues;
            if verdict.valid {
                result.validation_status = ValidationStatus::Valid;
                result.corrections = None;
                reporter.log(id, format!("Image for question {} approved", idx + 1));
            } else {
                result.validation_status = ValidationStatus::Invalid;
                result.corrections = Some(
                    verdict
                        .corrections
                        .unwrap_or_else(|| GENERIC_CORRECTION.to_string()),
                );
                reporter.log(
                    id,
                    format!(
                        "Image for question {} rejected (score {:.2})",
                        idx + 1,
                        verdict.score
                    ),
                );
            }
            image_results.push(result);
        }

        let valid = image_results
            .iter()
            .filter(|r| r.validation_status == ValidationStatus::Valid)
            .count();
        reporter.metric(id, "images_valid", valid);
        reporter.phase_end(id, format!("{}/{} images valid", valid, image_results.len()));
        NodeUpdate::ImageValidate { image_results }
    }

    fn image_retry_node(&self, state: &OrchestrationState, reporter: &ProgressReporter) -> NodeUpdate {
        let id = GraphNode::ImageRetry.as_str();
        let round = state.image_retry_count + 1;
        let invalid = invalid_indices(state.image_results.as_deref().unwrap_or_default());
        reporter.phase_start(id, "Scheduling image regeneration");
        reporter.retry(
            round,
            format!("{} images rejected by validation", invalid.len()),
        );
        reporter.phase_end(id, format!("image retry round {}", round));
        NodeUpdate::ImageRetry {
            image_retry_count: round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::QuestionDraft;
    use crate::error::LlmError;
    use crate::llm::{Choice, CompletionRequest, CompletionResponse, Message, Usage};
    use crate::pipeline::progress::{progress_channel, ProgressEvent};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses; the last one repeats.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, _: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let mut responses = self.responses.lock().expect("lock");
            let content = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
            .ok_or_else(|| LlmError::RequestFailed("script exhausted".to_string()))?;
            Ok(CompletionResponse {
                id: "scripted".to_string(),
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

    fn questions_json() -> String {
        r#"{"questions": [{
            "question_number": 1,
            "title": "Leitura",
            "question_statement": "Qual e a ideia principal?",
            "alternatives": [
                {"letter": "A", "text": "Um", "is_correct": true},
                {"letter": "B", "text": "Dois", "is_correct": false}
            ],
            "explanation_question": "A e correta."
        }]}"#
            .to_string()
    }

    fn review_json(score: f64) -> String {
        format!(
            r#"{{"overall_score": {}, "summary_feedback": "melhorar distratores"}}"#,
            score
        )
    }

    fn graph(generator: Vec<String>, reviewer: Vec<String>) -> QuestionGraph {
        QuestionGraph::new(
            QuestionGeneratorAgent::with_defaults(Arc::new(ScriptedLlm::new(generator))),
            QualityReviewerAgent::with_defaults(Arc::new(ScriptedLlm::new(reviewer))),
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("D1", "2", "5")
            .with_count_questions(1)
            .with_count_alternatives(2)
    }

    fn state_after_review(score: f64, retry_count: u32) -> OrchestrationState {
        let mut state = OrchestrationState::new(request());
        for attempt in 1..=retry_count {
            state
                .apply(NodeUpdate::Generate {
                    questions: vec![QuestionDraft::default()],
                    retry_count: attempt,
                    error: None,
                })
                .expect("generate");
        }
        state
            .apply(NodeUpdate::Review {
                quality_score: score,
                revision_feedback: None,
                error: None,
            })
            .expect("review");
        state
    }

    #[test]
    fn test_route_start_honors_real_text_flag() {
        let state = OrchestrationState::new(request());
        assert_eq!(route_start(&state), GraphNode::Generate);
        let state = OrchestrationState::new(request().with_use_real_text(true));
        assert_eq!(route_start(&state), GraphNode::Search);
    }

    #[test]
    fn test_route_after_review() {
        let gate = QualityGate::default();
        assert_eq!(
            route_after_review(&state_after_review(0.5, 1), &gate),
            Some(GraphNode::Generate)
        );
        assert_eq!(route_after_review(&state_after_review(0.5, 3), &gate), None);
        assert_eq!(route_after_review(&state_after_review(0.7, 1), &gate), None);
    }

    #[test]
    fn test_route_on_image_requires_questions() {
        let mut state = state_after_review(0.9, 1);
        assert_eq!(route_on_image(&state), None);
        state.request.image_dependency = ImageDependency::Required;
        assert_eq!(route_on_image(&state), Some(GraphNode::ImageGenerate));
        state.questions.clear();
        assert_eq!(route_on_image(&state), None);
    }

    #[tokio::test]
    async fn test_run_approved_first_attempt() {
        let graph = graph(vec![questions_json()], vec![review_json(0.9)]);
        let outcome = graph.run(request()).await.expect("run");

        assert_eq!(outcome.path, vec![GraphNode::Generate, GraphNode::Review]);
        assert_eq!(outcome.retry_count, 1);
        assert!(outcome.approved);
        assert_eq!(outcome.questions.len(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_generation_retries() {
        let graph = graph(
            vec!["no json here".to_string(), questions_json()],
            vec![review_json(0.9)],
        );
        let outcome = graph.run(request()).await.expect("run");

        assert_eq!(outcome.retry_count, 2);
        assert_eq!(
            outcome.path,
            vec![
                GraphNode::Generate,
                GraphNode::Review,
                GraphNode::Generate,
                GraphNode::Review
            ]
        );
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let graph = graph(vec![questions_json()], vec![review_json(0.9)]);
        let err = graph
            .run(request().with_count_questions(0))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_step_limit_aborts_run() {
        let graph = graph(vec![questions_json()], vec![review_json(0.1)]).with_max_steps(3);
        let err = graph.run(request()).await.unwrap_err();
        assert!(matches!(err, GraphError::StepLimitExceeded { limit: 3 }));
    }

    #[tokio::test]
    async fn test_run_streaming_emits_single_terminal_event() {
        let graph = graph(vec![questions_json()], vec![review_json(0.5), review_json(0.8)]);
        let (reporter, stream) = progress_channel(Duration::from_secs(5));

        graph
            .run_streaming(request(), &reporter)
            .await
            .expect("run");
        drop(reporter);

        let events = stream.collect_all().await;
        let terminal: Vec<_> = events.iter().filter(|e| e.event.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(events.last().map(|e| &e.event), Some(ProgressEvent::Finished { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e.event, ProgressEvent::Retry { attempt: 2, .. })));
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    }
}
