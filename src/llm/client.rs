//! Chat-completion client shared by the text agents.
//!
//! Provides the provider-neutral message and request types, the
//! [`LlmProvider`] trait every agent depends on, and [`ChatClient`], an
//! OpenAI-compatible implementation that targets DeepSeek, OpenAI or the
//! Gemini compatibility endpoint depending on the configured model.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::error::LlmError;

/// DeepSeek OpenAI-compatible endpoint.
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// OpenAI endpoint.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Gemini OpenAI-compatible endpoint.
const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier; empty means the provider's configured model.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl CompletionResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for a completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Recognized per-client options: model id, temperature, retries and timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    /// Model identifier.
    pub model: String,
    /// Default sampling temperature.
    pub temperature: f64,
    /// Retries allowed on transient transport failures.
    pub max_retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            temperature: 1.0,
            max_retries: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmSettings {
    /// Settings used by the question generator and reviewer.
    pub fn question_defaults() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            max_retries: 3,
            timeout: Duration::from_secs(120),
        }
    }

    /// Settings used by the image generator and validator.
    pub fn image_defaults() -> Self {
        Self {
            model: "gemini-3-pro-image-preview".to_string(),
            temperature: 1.0,
            max_retries: 3,
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the temperature, clamped to the provider range.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Sets the transient retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

/// Chat-completion vendors reachable through an OpenAI-compatible API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatVendor {
    DeepSeek,
    OpenAi,
    Gemini,
}

impl ChatVendor {
    /// Resolves the vendor serving a model id.
    pub fn for_model(model: &str) -> Result<Self, LlmError> {
        let lower = model.to_lowercase();
        if lower.contains("deepseek") {
            Ok(Self::DeepSeek)
        } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
            Ok(Self::OpenAi)
        } else if lower.starts_with("gemini") {
            Ok(Self::Gemini)
        } else {
            Err(LlmError::UnsupportedModel(model.to_string()))
        }
    }

    /// Default base URL for the vendor.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::DeepSeek => DEEPSEEK_BASE_URL,
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Gemini => GEMINI_OPENAI_BASE_URL,
        }
    }

    /// Environment variables holding the vendor credential, in lookup order.
    pub fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            Self::DeepSeek => &["DEEPSEEK_API_KEY"],
            Self::OpenAi => &["OPENAI_API_KEY"],
            Self::Gemini => &["GOOGLE_GENAI_API_KEY", "GOOGLE_API_KEY"],
        }
    }
}

/// OpenAI-compatible chat client with transient-failure retries.
pub struct ChatClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Creates a client for the vendor serving `settings.model`, reading the
    /// credential from the environment.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiKey` when the vendor's key is not set and
    /// `LlmError::UnsupportedModel` when no vendor serves the model.
    pub fn from_env(settings: LlmSettings) -> Result<Self, LlmError> {
        let vendor = ChatVendor::for_model(&settings.model)?;
        let vars = vendor.api_key_vars();
        let api_key = vars
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| LlmError::MissingApiKey(vars.join(" or ")))?;

        Self::with_endpoint(vendor.base_url(), api_key, settings)
    }

    /// Creates a client against an explicit OpenAI-compatible endpoint.
    pub fn with_endpoint(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: LlmSettings,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey("api_key".to_string()));
        }

        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the client settings.
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Execute a single request (no retry logic).
    async fn execute_request(&self, request: &ApiRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        seconds: self.settings.timeout.as_secs(),
                    }
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|parsed| parsed.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            })
            .collect();

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            choices,
            usage: api_response.usage,
        })
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let api_request = ApiRequest {
            model: if request.model.is_empty() {
                self.settings.model.clone()
            } else {
                request.model
            },
            messages: request.messages,
            temperature: Some(request.temperature.unwrap_or(self.settings.temperature)),
            max_tokens: request.max_tokens,
        };

        tracing::debug!(
            model = %api_request.model,
            messages = api_request.messages.len(),
            "Sending chat completion request"
        );

        self.settings
            .retry_policy()
            .execute("chat_completion", || self.execute_request(&api_request))
            .await
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Internal response structure from the OpenAI-compatible API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, "system");
        assert_eq!(Message::user("u").role, "user");
        let assistant = Message::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content, "Hi there!");
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new("deepseek-chat", vec![Message::user("test")])
            .with_temperature(0.3)
            .with_max_tokens(1000);

        assert_eq!(request.model, "deepseek-chat");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_first_content() {
        let response = CompletionResponse {
            id: "id".to_string(),
            model: "m".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("Hello!"),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        };
        assert_eq!(response.first_content(), Some("Hello!"));

        let empty = CompletionResponse {
            choices: vec![],
            ..response
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_settings_presets() {
        let question = LlmSettings::question_defaults();
        assert_eq!(question.model, "deepseek-chat");
        assert!((question.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(question.timeout, Duration::from_secs(120));
        assert_eq!(question.max_retries, 3);

        let image = LlmSettings::image_defaults();
        assert_eq!(image.model, "gemini-3-pro-image-preview");
        assert_eq!(image.timeout, Duration::from_secs(60));

        let clamped = LlmSettings::default().with_temperature(5.0);
        assert!((clamped.temperature - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_vendor_resolution() {
        assert_eq!(
            ChatVendor::for_model("deepseek-chat").expect("deepseek is supported"),
            ChatVendor::DeepSeek
        );
        assert_eq!(
            ChatVendor::for_model("gpt-4o-mini").expect("openai is supported"),
            ChatVendor::OpenAi
        );
        assert_eq!(
            ChatVendor::for_model("gemini-2.5-flash").expect("gemini is supported"),
            ChatVendor::Gemini
        );
        assert!(matches!(
            ChatVendor::for_model("llama-3"),
            Err(LlmError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_empty_key_rejected_at_construction() {
        let result = ChatClient::with_endpoint(
            "http://localhost:4000",
            "  ",
            LlmSettings::question_defaults(),
        );
        assert!(matches!(result, Err(LlmError::MissingApiKey(_))));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = ChatClient::with_endpoint(
            "http://localhost:65535",
            "test-key",
            LlmSettings::question_defaults().with_max_retries(0),
        )
        .expect("client should build");

        let request = CompletionRequest::new("", vec![Message::user("test")]);
        let result = client.generate(request).await;

        assert!(matches!(
            result,
            Err(LlmError::RequestFailed(_)) | Err(LlmError::Timeout { .. })
        ));
    }

    #[test]
    fn test_api_request_serialization() {
        let request = ApiRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::user("Hello")],
            temperature: Some(0.7),
            max_tokens: None,
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"deepseek-chat\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_api_response_tolerates_missing_usage_and_null_content() {
        let body = r#"{"id":"x","model":"deepseek-chat","choices":[{"index":0,"message":{"role":"assistant","content":null},"finish_reason":null}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).expect("response should parse");
        assert_eq!(parsed.usage.total_tokens, 0);
        assert!(parsed.choices[0].message.content.is_none());
    }
}
