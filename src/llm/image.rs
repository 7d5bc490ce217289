//! Image generation, editing and multimodal analysis providers.
//!
//! The image agents depend only on [`ImageProvider`] and [`VisionProvider`];
//! [`GeminiClient`] implements both over the Gemini `generateContent` REST
//! endpoint, exchanging images as base64 `inlineData` parts.

use std::env;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::client::LlmSettings;
use crate::error::ImageError;

/// Gemini REST API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used for multimodal image review.
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";

/// Aspect ratios accepted by the image model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "3:4")]
    Standard,
    #[serde(rename = "4:3")]
    Classic,
}

impl AspectRatio {
    /// The ratio as sent to the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
            Self::Standard => "3:4",
            Self::Classic => "4:3",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(Self::Square),
            "9:16" => Ok(Self::Portrait),
            "16:9" => Ok(Self::Landscape),
            "3:4" => Ok(Self::Standard),
            "4:3" => Ok(Self::Classic),
            other => Err(ImageError::InvalidAspectRatio(other.to_string())),
        }
    }
}

/// MIME type of an encoded image, read from its leading magic bytes.
///
/// Unrecognized payloads are reported as PNG, the format the image model
/// returns by default.
pub fn image_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    }
}

/// Produces images from text, or edits an existing image.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate a new image from a prompt.
    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ImageError>;

    /// Edit an existing image following natural-language instructions.
    async fn edit_image(
        &self,
        image: &[u8],
        instructions: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ImageError>;
}

/// Answers a text prompt about an image.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Analyze `image` and return the model's raw text answer.
    async fn analyze(&self, image: &[u8], prompt: &str) -> Result<String, ImageError>;
}

/// Gemini client implementing image generation, editing and vision analysis.
pub struct GeminiClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    settings: LlmSettings,
    vision_model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .field("vision_model", &self.vision_model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Creates a client from `GOOGLE_GENAI_API_KEY` (or `GOOGLE_API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns `ImageError::MissingApiKey` when neither variable is set.
    pub fn from_env(settings: LlmSettings) -> Result<Self, ImageError> {
        let api_key = ["GOOGLE_GENAI_API_KEY", "GOOGLE_API_KEY"]
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                ImageError::MissingApiKey("GOOGLE_GENAI_API_KEY or GOOGLE_API_KEY".to_string())
            })?;
        Self::new(api_key, settings)
    }

    /// Creates a client with an explicit key.
    pub fn new(api_key: impl Into<String>, settings: LlmSettings) -> Result<Self, ImageError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ImageError::MissingApiKey("api_key".to_string()));
        }
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ImageError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            settings,
            vision_model: DEFAULT_VISION_MODEL.to_string(),
        })
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the model used by [`VisionProvider::analyze`].
    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    /// Get the image model settings.
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn timeout_secs(&self) -> u64 {
        self.settings.timeout.as_secs()
    }

    /// Execute a single `generateContent` call (no retry logic).
    async fn execute_request(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ImageError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ImageError::Timeout {
                        seconds: self.timeout_secs(),
                    }
                } else {
                    ImageError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<GeminiErrorResponse>(&error_text)
                .map(|parsed| parsed.error.message)
                .unwrap_or(error_text);
            if status_code == 429 {
                return Err(ImageError::RateLimited(message));
            }
            return Err(ImageError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| ImageError::ParseError(format!("Failed to parse Gemini response: {}", e)))
    }

    async fn generate_content(
        &self,
        model: &str,
        body: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ImageError> {
        self.settings
            .retry_policy()
            .execute("gemini_generate_content", || {
                self.execute_request(model, &body)
            })
            .await
    }

    fn image_request(
        &self,
        parts: Vec<Part>,
        aspect_ratio: AspectRatio,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(self.settings.temperature),
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                image_config: Some(ImageConfig {
                    aspect_ratio: aspect_ratio.as_str().to_string(),
                }),
            }),
        }
    }
}

#[async_trait]
impl ImageProvider for GeminiClient {
    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ImageError> {
        tracing::info!(model = %self.settings.model, aspect_ratio = %aspect_ratio, "Generating image");
        let body = self.image_request(vec![Part::text(prompt)], aspect_ratio);
        let response = self.generate_content(&self.settings.model, body).await?;
        response.first_image()
    }

    async fn edit_image(
        &self,
        image: &[u8],
        instructions: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ImageError> {
        tracing::info!(model = %self.settings.model, "Editing existing image");
        let body = self.image_request(
            vec![Part::inline_image(image), Part::text(instructions)],
            aspect_ratio,
        );
        let response = self.generate_content(&self.settings.model, body).await?;
        response.first_image()
    }
}

#[async_trait]
impl VisionProvider for GeminiClient {
    async fn analyze(&self, image: &[u8], prompt: &str) -> Result<String, ImageError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::text(prompt), Part::inline_image(image)],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                response_modalities: None,
                image_config: None,
            }),
        };
        let response = self.generate_content(&self.vision_model, body).await?;
        response.text()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_image(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image_mime_type(bytes).to_string(),
                data: BASE64.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    fn first_image(&self) -> Result<Vec<u8>, ImageError> {
        let data = self
            .parts()
            .find_map(|p| p.inline_data.as_ref())
            .ok_or(ImageError::NoImageData)?;
        Ok(BASE64.decode(data.data.as_bytes())?)
    }

    fn text(&self) -> Result<String, ImageError> {
        let text: Vec<&str> = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            return Err(ImageError::NoTextContent);
        }
        Ok(text.join(""))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}
