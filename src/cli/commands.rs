//! CLI command definitions for quizforge.
//!
//! `generate` runs the question graph on a background task and either waits
//! for the result or streams its progress as Server-Sent Events lines.
//! `show` prints a batch previously saved to the output directory and
//! `regenerate-image` redoes one of its images from user instructions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::info;
use uuid::Uuid;

use crate::agents::{
    CuratedTextProvider, EvaluationModel, FallbackTextProvider, GenerationRequest,
    ImageDependency, ImageGeneratorAgent, ImageGeneratorConfig, ImageValidatorAgent,
    SourceTextProvider,
};
use crate::llm::{ChatClient, GeminiClient, ImageProvider, LlmProvider, VisionProvider};
use crate::pipeline::{
    join_run, regenerate_stored_image, spawn_generation, PipelineConfig, QuestionGraph, RunReport,
};
use crate::storage::{BatchStore, JsonFileStore};

/// Multiple-choice assessment item generator.
#[derive(Parser)]
#[command(name = "quizforge")]
#[command(about = "Generate, review and illustrate multiple-choice assessment items")]
#[command(version)]
#[command(
    long_about = "quizforge drafts multiple-choice questions with an LLM, reviews them against a pedagogical rubric, regenerates weak batches and, when required, produces and validates an image for every question.\n\nExample usage:\n  quizforge generate --skill \"D1 - Localizar informações explícitas\" --level 2 --grade 5 --count 3"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate a batch of questions.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Print a saved batch.
    Show(ShowArgs),

    /// Regenerate the image of one saved question.
    RegenerateImage(RegenerateImageArgs),
}

/// Arguments for the generate command.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Read the whole request from a YAML or JSON file instead of flags.
    #[arg(short = 'r', long, conflicts_with_all = ["skill", "level", "grade"])]
    pub request: Option<PathBuf>,

    /// Target skill, e.g. "D1 - Localizar informações explícitas".
    #[arg(long, required_unless_present = "request")]
    pub skill: Option<String>,

    /// Proficiency level.
    #[arg(long, required_unless_present = "request")]
    pub level: Option<String>,

    /// School grade.
    #[arg(long, required_unless_present = "request")]
    pub grade: Option<String>,

    /// Number of questions.
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u32,

    /// Alternatives per question.
    #[arg(long, default_value = "4")]
    pub alternatives: u32,

    /// Curriculum component (subject).
    #[arg(long, default_value = "")]
    pub component: String,

    /// Base texts on authentic published works.
    #[arg(long)]
    pub authentic: bool,

    /// Retrieve real source texts before generating.
    #[arg(long)]
    pub real_text: bool,

    /// YAML passage bank searched before the built-in one; implies --real-text.
    #[arg(long, value_name = "FILE")]
    pub texts: Option<PathBuf>,

    /// Image policy: none, optional or required.
    #[arg(long, default_value = "none")]
    pub image_dependency: String,

    /// Assessment model: SAEB, SEAMA or ENEM.
    #[arg(long, default_value = "SAEB")]
    pub evaluation_model: String,

    /// Text model; overrides QUIZFORGE_MODEL.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Output directory; overrides QUIZFORGE_OUTPUT_DIR.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Do not save the batch.
    #[arg(long)]
    pub no_save: bool,

    /// Print progress events as SSE lines while the run proceeds.
    #[arg(long)]
    pub stream: bool,

    /// Print the final report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the show command.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Group id printed by `generate`.
    pub group_id: Uuid,

    /// Output directory the batch was saved to; overrides QUIZFORGE_OUTPUT_DIR.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the regenerate-image command.
#[derive(Parser, Debug)]
pub struct RegenerateImageArgs {
    /// Group id printed by `generate`.
    pub group_id: Uuid,

    /// 1-based number of the question in the batch.
    pub question: usize,

    /// What to change in the image.
    #[arg(short = 'i', long)]
    pub instructions: String,

    /// Output directory the batch was saved to; overrides QUIZFORGE_OUTPUT_DIR.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Skip validating the new image.
    #[arg(long)]
    pub no_validate: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::RegenerateImage(args) => run_regenerate_image_command(args).await,
    }
}

impl GenerateArgs {
    /// Builds the request from `--request` or from the individual flags.
    fn to_request(&self) -> anyhow::Result<GenerationRequest> {
        let mut request = match &self.request {
            Some(path) => load_request(path)?,
            None => {
                let image_dependency: ImageDependency = self.image_dependency.parse()?;
                let evaluation_model: EvaluationModel = self.evaluation_model.parse()?;
                GenerationRequest::new(
                    self.skill.clone().unwrap_or_default(),
                    self.level.clone().unwrap_or_default(),
                    self.grade.clone().unwrap_or_default(),
                )
                .with_count_questions(self.count)
                .with_count_alternatives(self.alternatives)
                .with_curriculum_component(self.component.clone())
                .with_authentic(self.authentic)
                .with_use_real_text(self.real_text)
                .with_image_dependency(image_dependency)
                .with_evaluation_model(evaluation_model)
            }
        };
        if self.texts.is_some() {
            request.use_real_text = true;
        }
        request.validate()?;
        Ok(request)
    }
}

/// Reads a request file, as JSON when the extension says so and YAML otherwise.
fn load_request(path: &Path) -> anyhow::Result<GenerationRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let request = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON request in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML request in {}", path.display()))?
    };
    Ok(request)
}

/// The built-in bank, behind a user bank when `texts` names one.
fn build_text_provider(texts: Option<&Path>) -> anyhow::Result<Arc<dyn SourceTextProvider>> {
    let embedded: Arc<dyn SourceTextProvider> = Arc::new(
        CuratedTextProvider::embedded().context("Failed to load the curated text bank")?,
    );
    let Some(path) = texts else {
        return Ok(embedded);
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text bank {}", path.display()))?;
    let bank = CuratedTextProvider::from_yaml(&content)
        .with_context(|| format!("Invalid text bank in {}", path.display()))?;
    info!(path = %path.display(), passages = bank.len(), "Loaded user text bank");
    Ok(Arc::new(FallbackTextProvider::new(Arc::new(bank), embedded)))
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env().context("Invalid QUIZFORGE_* configuration")?;
    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }
    if let Some(output) = &args.output {
        config = config.with_output_dir(output.clone());
    }
    config.validate()?;

    let request = args.to_request()?;

    // Credentials are checked here, before any work starts.
    let llm_client: Arc<dyn LlmProvider> = Arc::new(
        ChatClient::from_env(config.question_llm.clone())
            .context("Failed to initialize the text model client")?,
    );

    let (image_client, vision_client): (
        Option<Arc<dyn ImageProvider>>,
        Option<Arc<dyn VisionProvider>>,
    ) = if request.image_dependency == ImageDependency::Required {
        let gemini = Arc::new(
            GeminiClient::from_env(config.image_llm.clone())
                .context("Failed to initialize the image model client")?
                .with_vision_model(config.vision_model.clone()),
        );
        let image: Arc<dyn ImageProvider> = gemini.clone();
        let vision: Arc<dyn VisionProvider> = gemini;
        (Some(image), Some(vision))
    } else {
        (None, None)
    };

    let text_provider = if request.use_real_text {
        Some(build_text_provider(args.texts.as_deref())?)
    } else {
        None
    };

    let graph = Arc::new(QuestionGraph::from_config(
        &config,
        llm_client,
        image_client,
        vision_client,
        text_provider,
    ));

    let store: Option<Arc<dyn BatchStore>> = if args.no_save {
        None
    } else {
        Some(Arc::new(JsonFileStore::new(config.output_dir.clone())))
    };

    info!(
        skill = %request.skill,
        count = request.count_questions,
        image_dependency = %request.image_dependency,
        model = %config.question_llm.model,
        "Starting generation"
    );

    let handle = spawn_generation(graph, request, store, config.stream_idle_timeout);
    let run_id = handle.run_id;

    let report = if args.stream {
        let events = handle
            .events
            .with_heartbeat(config.stream_heartbeat_interval)
            .into_stream();
        tokio::pin!(events);
        while let Some(envelope) = events.next().await {
            print!("{}", envelope.to_sse_line());
        }
        join_run(handle.task).await?
    } else {
        handle.wait().await?
    };

    info!(run_id = %run_id, "Generation finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !args.stream {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let outcome = &report.outcome;
    println!(
        "Generated {} question(s), score {:.2} ({}) after {} attempt(s)",
        outcome.questions.len(),
        outcome.quality_score,
        if outcome.approved { "approved" } else { "below threshold" },
        outcome.retry_count
    );

    for (idx, question) in outcome.questions.iter().enumerate() {
        println!(
            "  {}. {} [answer {}]{}",
            idx + 1,
            question.draft.question_statement,
            question.draft.correct_answer,
            if question.needs_manual_image {
                " (needs manual image)"
            } else {
                ""
            }
        );
    }

    if let Some(error) = &outcome.error {
        println!("Last error: {}", error);
    }
    match (&report.saved, &report.storage_error) {
        (Some(saved), _) => println!(
            "Saved batch {} to {}",
            saved.group_id,
            saved.location.display()
        ),
        (None, Some(error)) => println!("Batch not saved: {}", error),
        (None, None) => {}
    }
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let output = match args.output {
        Some(output) => output,
        None => PipelineConfig::from_env()?.output_dir,
    };
    let store = JsonFileStore::new(output);
    let record = store
        .load_batch(args.group_id)
        .await
        .with_context(|| format!("Failed to load batch {}", args.group_id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn run_regenerate_image_command(args: RegenerateImageArgs) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env().context("Invalid QUIZFORGE_* configuration")?;
    if let Some(output) = &args.output {
        config = config.with_output_dir(output.clone());
    }

    let gemini = Arc::new(
        GeminiClient::from_env(config.image_llm.clone())
            .context("Failed to initialize the image model client")?
            .with_vision_model(config.vision_model.clone()),
    );
    let generator = ImageGeneratorAgent::new(
        gemini.clone(),
        ImageGeneratorConfig::default()
            .with_aspect_ratio(config.image_aspect_ratio)
            .with_edit_on_regenerate(config.edit_images_on_retry),
    );
    let validator = (!args.no_validate).then(|| ImageValidatorAgent::new(gemini));

    let store = JsonFileStore::new(config.output_dir.clone());
    let result = regenerate_stored_image(
        &store,
        args.group_id,
        args.question,
        &args.instructions,
        &generator,
        validator.as_ref(),
    )
    .await
    .with_context(|| {
        format!(
            "Failed to regenerate image {} of batch {}",
            args.question, args.group_id
        )
    })?;

    let question = &result.question;
    println!(
        "Question {}: image {} ({})",
        result.question_number,
        question.image_file.as_deref().unwrap_or("-"),
        question
            .image_validation_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    for issue in &question.image_validation_issues {
        println!("  - {}", issue);
    }
    Ok(())
}
