//! Pipeline configuration for the question graph.
//!
//! This module provides configuration options for the generation graph,
//! including quality thresholds, retry ceilings, the reviewer failure policy,
//! image settings, streaming limits, LLM options and the output directory.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::agents::ReviewFailurePolicy;
use crate::llm::{AspectRatio, LlmSettings, DEFAULT_VISION_MODEL};

/// Problems loading or checking a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable that must be set is absent.
    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),

    /// A variable is set but cannot be parsed for its key.
    #[error("{key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Values parsed but are inconsistent or out of range.
    #[error("invalid pipeline configuration: {0}")]
    ValidationFailed(String),

    /// Reading a configuration source failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the question generation graph.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Text quality loop
    /// Minimum review score for approval.
    pub quality_threshold: f64,
    /// Maximum generate/review attempts.
    pub max_retries: u32,
    /// Whether a reviewer failure approves the batch.
    pub review_fail_open: bool,
    /// Score given to a batch approved by the fail-open policy.
    pub neutral_review_score: f64,

    // Image quality loop
    /// Maximum image regeneration rounds.
    pub image_max_retries: u32,
    /// Aspect ratio requested from the image model.
    pub image_aspect_ratio: AspectRatio,
    /// Edit the previous image on regeneration instead of redrawing it.
    pub edit_images_on_retry: bool,
    /// Let an LLM write image prompts before falling back to local ones.
    pub use_prompt_engineer: bool,

    // Execution limits
    /// Longest silence tolerated on the progress stream.
    pub stream_idle_timeout: Duration,
    /// Heartbeat interval for streaming consumers; zero disables heartbeats.
    pub stream_heartbeat_interval: Duration,
    /// Node executions allowed per run before aborting.
    pub max_graph_steps: usize,

    // LLM settings
    /// Settings for the generator and reviewer.
    pub question_llm: LlmSettings,
    /// Settings for the image model.
    pub image_llm: LlmSettings,
    /// Model used for image validation.
    pub vision_model: String,

    // Storage settings
    /// Directory where finished batches are written.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            max_retries: 3,
            review_fail_open: true,
            neutral_review_score: 0.75,

            image_max_retries: 2,
            image_aspect_ratio: AspectRatio::Square,
            edit_images_on_retry: true,
            use_prompt_engineer: false,

            stream_idle_timeout: Duration::from_secs(300), // 5 minutes
            stream_heartbeat_interval: Duration::from_secs(15),
            max_graph_steps: 64,

            question_llm: LlmSettings::question_defaults(),
            image_llm: LlmSettings::image_defaults(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),

            output_dir: PathBuf::from("./output"),
        }
    }
}

impl PipelineConfig {
    /// Same as [`PipelineConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from `QUIZFORGE_*` variables over the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `QUIZFORGE_QUALITY_THRESHOLD`: Approval threshold (default: 0.7)
    /// - `QUIZFORGE_MAX_RETRIES`: Generate/review attempts (default: 3)
    /// - `QUIZFORGE_REVIEW_FAIL_OPEN`: Approve on reviewer failure (default: true)
    /// - `QUIZFORGE_NEUTRAL_REVIEW_SCORE`: Fail-open score (default: 0.75)
    /// - `QUIZFORGE_IMAGE_MAX_RETRIES`: Image regeneration rounds (default: 2)
    /// - `QUIZFORGE_IMAGE_ASPECT_RATIO`: One of 1:1, 9:16, 16:9, 3:4, 4:3 (default: 1:1)
    /// - `QUIZFORGE_EDIT_IMAGES`: Edit instead of redraw on retry (default: true)
    /// - `QUIZFORGE_PROMPT_ENGINEER`: LLM-written image prompts (default: false)
    /// - `QUIZFORGE_STREAM_TIMEOUT_SECS`: Progress stream idle timeout (default: 300)
    /// - `QUIZFORGE_STREAM_HEARTBEAT_SECS`: Heartbeat interval, 0 disables (default: 15)
    /// - `QUIZFORGE_MAX_GRAPH_STEPS`: Node executions per run (default: 64)
    /// - `QUIZFORGE_MODEL`: Text model (default: deepseek-chat)
    /// - `QUIZFORGE_TEMPERATURE`: Text model temperature (default: 0.7)
    /// - `QUIZFORGE_LLM_MAX_RETRIES`: Transient retries per call (default: 3)
    /// - `QUIZFORGE_LLM_TIMEOUT_SECS`: Text request timeout (default: 120)
    /// - `QUIZFORGE_IMAGE_MODEL`: Image model (default: gemini-3-pro-image-preview)
    /// - `QUIZFORGE_VISION_MODEL`: Vision model (default: gemini-2.0-flash)
    /// - `QUIZFORGE_OUTPUT_DIR`: Output directory (default: ./output)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if variables have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Text quality loop
        if let Some(val) = lookup("QUIZFORGE_QUALITY_THRESHOLD") {
            config.quality_threshold = parse_env_value(&val, "QUIZFORGE_QUALITY_THRESHOLD")?;
        }

        if let Some(val) = lookup("QUIZFORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "QUIZFORGE_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("QUIZFORGE_REVIEW_FAIL_OPEN") {
            config.review_fail_open = parse_env_bool(&val, "QUIZFORGE_REVIEW_FAIL_OPEN")?;
        }

        if let Some(val) = lookup("QUIZFORGE_NEUTRAL_REVIEW_SCORE") {
            config.neutral_review_score =
                parse_env_value(&val, "QUIZFORGE_NEUTRAL_REVIEW_SCORE")?;
        }

        // Image quality loop
        if let Some(val) = lookup("QUIZFORGE_IMAGE_MAX_RETRIES") {
            config.image_max_retries = parse_env_value(&val, "QUIZFORGE_IMAGE_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("QUIZFORGE_IMAGE_ASPECT_RATIO") {
            config.image_aspect_ratio =
                val.parse().map_err(|e: crate::error::ImageError| ConfigError::InvalidValue {
                    key: "QUIZFORGE_IMAGE_ASPECT_RATIO".to_string(),
                    message: e.to_string(),
                })?;
        }

        if let Some(val) = lookup("QUIZFORGE_EDIT_IMAGES") {
            config.edit_images_on_retry = parse_env_bool(&val, "QUIZFORGE_EDIT_IMAGES")?;
        }

        if let Some(val) = lookup("QUIZFORGE_PROMPT_ENGINEER") {
            config.use_prompt_engineer = parse_env_bool(&val, "QUIZFORGE_PROMPT_ENGINEER")?;
        }

        // Execution limits
        if let Some(val) = lookup("QUIZFORGE_STREAM_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "QUIZFORGE_STREAM_TIMEOUT_SECS")?;
            config.stream_idle_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("QUIZFORGE_STREAM_HEARTBEAT_SECS") {
            let secs: u64 = parse_env_value(&val, "QUIZFORGE_STREAM_HEARTBEAT_SECS")?;
            config.stream_heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("QUIZFORGE_MAX_GRAPH_STEPS") {
            config.max_graph_steps = parse_env_value(&val, "QUIZFORGE_MAX_GRAPH_STEPS")?;
        }

        // LLM settings
        if let Some(val) = lookup("QUIZFORGE_MODEL") {
            config.question_llm.model = val;
        }

        if let Some(val) = lookup("QUIZFORGE_TEMPERATURE") {
            config.question_llm.temperature = parse_env_value(&val, "QUIZFORGE_TEMPERATURE")?;
        }

        if let Some(val) = lookup("QUIZFORGE_LLM_MAX_RETRIES") {
            let retries: u32 = parse_env_value(&val, "QUIZFORGE_LLM_MAX_RETRIES")?;
            config.question_llm.max_retries = retries;
            config.image_llm.max_retries = retries;
        }

        if let Some(val) = lookup("QUIZFORGE_LLM_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "QUIZFORGE_LLM_TIMEOUT_SECS")?;
            config.question_llm.timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("QUIZFORGE_IMAGE_MODEL") {
            config.image_llm.model = val;
        }

        if let Some(val) = lookup("QUIZFORGE_VISION_MODEL") {
            config.vision_model = val;
        }

        // Storage settings
        if let Some(val) = lookup("QUIZFORGE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks thresholds, retry ceilings and timeouts.
    ///
    /// # Errors
    ///
    /// The first violated constraint is reported as `ConfigError::ValidationFailed`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::ValidationFailed(
                "quality_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.neutral_review_score) {
            return Err(ConfigError::ValidationFailed(
                "neutral_review_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.review_fail_open && self.neutral_review_score < self.quality_threshold {
            return Err(ConfigError::ValidationFailed(format!(
                "neutral_review_score ({}) must not be below quality_threshold ({}) when the reviewer fails open",
                self.neutral_review_score, self.quality_threshold
            )));
        }

        if self.stream_idle_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "stream_idle_timeout must be greater than 0".to_string(),
            ));
        }

        // Search, plus one generate/review pair per attempt, plus one
        // generate/validate/retry triple per image round.
        let required_steps =
            1 + 2 * self.max_retries as usize + 3 * (self.image_max_retries as usize + 1);
        if self.max_graph_steps < required_steps {
            return Err(ConfigError::ValidationFailed(format!(
                "max_graph_steps must be at least {} for the configured retry ceilings",
                required_steps
            )));
        }

        if self.question_llm.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "question model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.question_llm.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.image_llm.model.is_empty() || self.vision_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "image and vision models cannot be empty".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The reviewer failure policy these settings describe.
    pub fn review_failure_policy(&self) -> ReviewFailurePolicy {
        if self.review_fail_open {
            ReviewFailurePolicy::FailOpen {
                neutral_score: self.neutral_review_score,
            }
        } else {
            ReviewFailurePolicy::FailClosed
        }
    }

    /// Builder method to set the approval threshold.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Builder method to set the generate/review attempt ceiling.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Builder method to set the reviewer failure policy.
    pub fn with_review_fail_open(mut self, fail_open: bool) -> Self {
        self.review_fail_open = fail_open;
        self
    }

    /// Builder method to set the score given to a batch whose review failed.
    pub fn with_neutral_review_score(mut self, score: f64) -> Self {
        self.neutral_review_score = score;
        self
    }

    /// Builder method to set the image regeneration ceiling.
    pub fn with_image_max_retries(mut self, max: u32) -> Self {
        self.image_max_retries = max;
        self
    }

    /// Builder method to set the image aspect ratio.
    pub fn with_image_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.image_aspect_ratio = aspect_ratio;
        self
    }

    /// Builder method to set the stream idle timeout.
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Builder method to set the heartbeat interval.
    pub fn with_stream_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.stream_heartbeat_interval = interval;
        self
    }

    /// Builder method to set the graph step limit.
    pub fn with_max_graph_steps(mut self, max: usize) -> Self {
        self.max_graph_steps = max;
        self
    }

    /// Builder method to set the text model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.question_llm.model = model.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }
}

/// Parses `value` with `FromStr`, naming `key` on failure.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Accepts true/false, 1/0, yes/no and on/off.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!((config.quality_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.image_max_retries, 2);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(300));
        assert_eq!(config.stream_heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.image_aspect_ratio, AspectRatio::Square);
        assert_eq!(config.vision_model, "gemini-2.0-flash");
        assert_eq!(
            config.review_failure_policy(),
            ReviewFailurePolicy::FailOpen { neutral_score: 0.75 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("QUIZFORGE_QUALITY_THRESHOLD", "0.8"),
            ("QUIZFORGE_MAX_RETRIES", "2"),
            ("QUIZFORGE_REVIEW_FAIL_OPEN", "off"),
            ("QUIZFORGE_IMAGE_ASPECT_RATIO", "16:9"),
            ("QUIZFORGE_STREAM_TIMEOUT_SECS", "30"),
            ("QUIZFORGE_STREAM_HEARTBEAT_SECS", "0"),
            ("QUIZFORGE_MODEL", "gpt-4o-mini"),
            ("QUIZFORGE_LLM_MAX_RETRIES", "5"),
            ("QUIZFORGE_OUTPUT_DIR", "/tmp/quiz"),
        ]))
        .expect("valid configuration");

        assert!((config.quality_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.review_failure_policy(), ReviewFailurePolicy::FailClosed);
        assert_eq!(config.image_aspect_ratio, AspectRatio::Landscape);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(30));
        assert!(config.stream_heartbeat_interval.is_zero());
        assert_eq!(config.question_llm.model, "gpt-4o-mini");
        assert_eq!(config.question_llm.max_retries, 5);
        assert_eq!(config.image_llm.max_retries, 5);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/quiz"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = PipelineConfig::from_lookup(lookup(&[("QUIZFORGE_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("QUIZFORGE_MAX_RETRIES"));

        let err = PipelineConfig::from_lookup(lookup(&[("QUIZFORGE_IMAGE_ASPECT_RATIO", "2:1")]))
            .unwrap_err();
        assert!(err.to_string().contains("QUIZFORGE_IMAGE_ASPECT_RATIO"));

        let err = PipelineConfig::from_lookup(lookup(&[("QUIZFORGE_QUALITY_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("quality_threshold"));
    }

    #[test]
    fn test_validation_step_limit_covers_retries() {
        let config = PipelineConfig::default().with_max_graph_steps(5);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_graph_steps"));
    }

    #[test]
    fn test_validation_fail_open_score_must_reach_threshold() {
        let raised = PipelineConfig::default().with_quality_threshold(0.8);
        let err = raised.clone().validate().unwrap_err();
        assert!(err.to_string().contains("neutral_review_score"));

        assert!(raised.clone().with_neutral_review_score(0.8).validate().is_ok());
        assert!(raised.with_review_fail_open(false).validate().is_ok());
    }

    #[test]
    fn test_validation_zero_retries() {
        let result = PipelineConfig::default().with_max_retries(0).validate();
        assert!(result.unwrap_err().to_string().contains("max_retries"));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let result = PipelineConfig::default()
            .with_stream_idle_timeout(Duration::ZERO)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("stream_idle_timeout"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(parse_env_bool("Yes", "test").unwrap());
        assert!(parse_env_bool("on", "test").unwrap());

        assert!(!parse_env_bool("false", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(!parse_env_bool("no", "test").unwrap());
        assert!(!parse_env_bool("OFF", "test").unwrap());

        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_config_error_messages_name_the_key() {
        let err = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert!(err.to_string().contains("TEST_VAR"));

        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));
    }
}
