//! Text Search Agent.
//!
//! Supplies authentic reading passages that ground question generation when
//! the request asks for real texts. Providers never fail for "no results";
//! they return an empty list. A provider failure is surfaced as
//! `AgentError::TextSearch` so the graph can continue without texts.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::error::AgentResult;
use super::types::{GenerationRequest, SourceText};
use crate::error::SearchError;

/// Embedded bank of public-domain passages.
const CURATED_TEXTS_YAML: &str = include_str!("../../data/curated_texts.yaml");

/// Source of authentic reading passages.
#[async_trait]
pub trait SourceTextProvider: Send + Sync {
    /// Returns up to `count` passages suited to `skill` and `grade`.
    async fn search(
        &self,
        skill: &str,
        grade: &str,
        count: usize,
    ) -> Result<Vec<SourceText>, SearchError>;
}

/// Offline provider sampling from a curated bank of public-domain texts.
#[derive(Debug, Clone)]
pub struct CuratedTextProvider {
    texts: Vec<SourceText>,
}

impl CuratedTextProvider {
    /// Creates a provider over an explicit text bank.
    pub fn new(texts: Vec<SourceText>) -> Self {
        Self { texts }
    }

    /// Creates a provider over the bank shipped with the crate.
    pub fn embedded() -> Result<Self, SearchError> {
        Self::from_yaml(CURATED_TEXTS_YAML)
    }

    /// Parses a YAML list of passages.
    pub fn from_yaml(yaml: &str) -> Result<Self, SearchError> {
        let texts: Vec<SourceText> = serde_yaml::from_str(yaml)
            .map_err(|e| SearchError::InvalidResponse(format!("curated text bank: {}", e)))?;
        Ok(Self::new(texts))
    }

    /// Number of passages in the bank.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Returns true if the bank is empty.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    fn sample(&self, count: usize) -> Vec<SourceText> {
        let mut picked = self.texts.clone();
        picked.shuffle(&mut rand::rng());
        picked.truncate(count);
        picked
    }
}

#[async_trait]
impl SourceTextProvider for CuratedTextProvider {
    async fn search(
        &self,
        skill: &str,
        grade: &str,
        count: usize,
    ) -> Result<Vec<SourceText>, SearchError> {
        tracing::debug!(skill = %skill, grade = %grade, count, "Sampling curated texts");
        Ok(self.sample(count))
    }
}

/// Tries a primary provider and falls back to a secondary one when the
/// primary fails or finds nothing.
pub struct FallbackTextProvider {
    primary: Arc<dyn SourceTextProvider>,
    fallback: Arc<dyn SourceTextProvider>,
}

impl FallbackTextProvider {
    pub fn new(primary: Arc<dyn SourceTextProvider>, fallback: Arc<dyn SourceTextProvider>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SourceTextProvider for FallbackTextProvider {
    async fn search(
        &self,
        skill: &str,
        grade: &str,
        count: usize,
    ) -> Result<Vec<SourceText>, SearchError> {
        match self.primary.search(skill, grade, count).await {
            Ok(texts) if !texts.is_empty() => return Ok(texts),
            Ok(_) => tracing::info!("Primary text provider found nothing, using fallback"),
            Err(err) => tracing::warn!(error = %err, "Primary text provider failed, using fallback"),
        }
        self.fallback.search(skill, grade, count).await
    }
}

/// Agent that retrieves source texts for a request.
pub struct TextSearchAgent {
    provider: Arc<dyn SourceTextProvider>,
}

impl std::fmt::Debug for TextSearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSearchAgent").finish_non_exhaustive()
    }
}

impl TextSearchAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "text_searcher";

    /// Creates a new search agent over `provider`.
    pub fn new(provider: Arc<dyn SourceTextProvider>) -> Self {
        Self { provider }
    }

    /// Retrieves one passage per requested question, with whitespace-only
    /// passages discarded.
    pub async fn search(&self, request: &GenerationRequest) -> AgentResult<Vec<SourceText>> {
        let texts = self
            .provider
            .search(
                &request.skill,
                &request.grade,
                request.count_questions as usize,
            )
            .await?;

        let texts: Vec<SourceText> = texts
            .into_iter()
            .filter(|t| !t.text.trim().is_empty())
            .collect();

        tracing::info!(found = texts.len(), "Text search finished");
        Ok(texts)
    }
}
