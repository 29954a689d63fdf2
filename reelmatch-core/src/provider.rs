//! Embedding provider: the video-understanding API that turns assets and text
//! into vectors.
//!
//! Provides an `EmbeddingProvider` trait with one HTTP implementation:
//! - **Twelve Labs** for per-segment video embeddings and text embeddings (1024-dim)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, Response};
use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ProviderConfig;
use crate::models::Scope;

/// Default Marengo embedding dimensions
pub const MARENGO_DIMENSIONS: usize = 1024;

// ============================================================================
// EmbeddingProvider trait
// ============================================================================

/// One embedded segment of a video asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub scope: Scope,
    pub start: f64,
    pub end: f64,
    pub values: Vec<f32>,
}

/// All segments the provider produced for an asset.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEmbedding {
    /// Human-readable asset name (original filename when the provider knows it).
    pub asset_name: String,
    pub segments: Vec<Segment>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a video asset living in the given provider index. An empty segment
    /// list is a valid answer.
    async fn embed_video(
        &self,
        asset_id: &str,
        tenant_index_id: &str,
    ) -> Result<VideoEmbedding, ProviderError>;

    /// Embed free text into the same space as video segments.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn dimensions(&self) -> usize;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Provider request timed out")]
    Timeout,

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("Unsupported provider backend '{0}'")]
    UnsupportedBackend(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout)
    }

    /// Client errors other than rate limiting will not improve on retry.
    fn is_permanent(&self) -> bool {
        match self {
            ProviderError::Api { code, .. } => (400..500).contains(code) && *code != 429,
            ProviderError::InvalidDimensions { .. }
            | ProviderError::Malformed(_)
            | ProviderError::MissingApiKey => true,
            _ => false,
        }
    }
}

/// Create the configured provider backend.
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn EmbeddingProvider>, ProviderError> {
    match config.backend.as_str() {
        "twelvelabs" => Ok(Box::new(TwelveLabsClient::new(config)?)),
        other => Err(ProviderError::UnsupportedBackend(other.to_string())),
    }
}

// ============================================================================
// Twelve Labs API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct VideoResponse {
    #[serde(default)]
    system_metadata: Option<SystemMetadata>,
    #[serde(default)]
    embedding: Option<VideoEmbeddingBody>,
}

#[derive(Debug, Deserialize)]
struct SystemMetadata {
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoEmbeddingBody {
    video_embedding: Option<SegmentList>,
}

#[derive(Debug, Deserialize)]
struct SegmentList {
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    float_: Vec<f32>,
    #[serde(default)]
    start_offset_sec: f64,
    #[serde(default)]
    end_offset_sec: f64,
    #[serde(default)]
    embedding_scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text_embedding: Option<SegmentList>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: Option<String>,
    message: Option<String>,
}

// ============================================================================
// TwelveLabsClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct TwelveLabsClient {
    client: Client,
    config: ProviderConfig,
    api_key: String,
    base_url: String,
}

impl TwelveLabsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &ProviderConfig, base_url: String) -> Result<Self, ProviderError> {
        let api_key = config.resolved_api_key();
        if api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run `attempt` with exponential backoff, giving up early on permanent errors.
    async fn with_retry<T, F, Fut>(&self, what: &str, attempt: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(retry_strategy, attempt, |e: &ProviderError| !e.is_permanent()).await;

        match result {
            Ok(v) => Ok(v),
            Err(e) if e.is_permanent() => Err(e),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All {} retry attempts failed",
                    what
                );
                Err(ProviderError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last: e.to_string(),
                })
            }
        }
    }

    async fn fetch_video_once(
        &self,
        asset_id: &str,
        tenant_index_id: &str,
    ) -> Result<VideoEmbedding, ProviderError> {
        let url = format!(
            "{}/indexes/{}/videos/{}",
            self.base_url, tenant_index_id, asset_id
        );

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&[("embedding_option", self.config.embedding_option.as_str())])
            .send()
            .await?;
        let body: VideoResponse = check_status(response).await?.json().await?;

        let asset_name = body
            .system_metadata
            .and_then(|m| m.filename)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| asset_id.to_string());

        let api_segments = body
            .embedding
            .and_then(|e| e.video_embedding)
            .map(|v| v.segments)
            .unwrap_or_default();

        let mut segments = Vec::with_capacity(api_segments.len());
        for s in api_segments {
            self.check_dimensions(s.float_.len())?;
            let scope_str = s.embedding_scope.as_deref().unwrap_or("clip");
            let scope = Scope::parse(scope_str).ok_or_else(|| {
                ProviderError::Malformed(format!("unknown embedding_scope '{}'", scope_str))
            })?;
            segments.push(Segment {
                scope,
                start: s.start_offset_sec,
                end: s.end_offset_sec,
                values: s.float_,
            });
        }

        Ok(VideoEmbedding {
            asset_name,
            segments,
        })
    }

    async fn embed_text_once(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let form = Form::new()
            .text("model_name", self.config.model.clone())
            .text("text", text.to_string());

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let body: TextResponse = check_status(response).await?.json().await?;

        let values = body
            .text_embedding
            .and_then(|t| t.segments.into_iter().next())
            .map(|s| s.float_)
            .ok_or_else(|| ProviderError::Malformed("missing text embedding".to_string()))?;

        self.check_dimensions(values.len())?;
        Ok(values)
    }

    fn check_dimensions(&self, actual: usize) -> Result<(), ProviderError> {
        if actual != self.config.dimension {
            return Err(ProviderError::InvalidDimensions {
                expected: self.config.dimension,
                actual,
            });
        }
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
        .ok()
        .map(|e| match (e.code, e.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (_, Some(message)) => message,
            (Some(code), None) => code,
            (None, None) => error_body.clone(),
        })
        .unwrap_or(error_body);

    tracing::error!(code = status.as_u16(), message = %message, "Twelve Labs API error");

    Err(ProviderError::Api {
        code: status.as_u16(),
        message,
    })
}

#[async_trait]
impl EmbeddingProvider for TwelveLabsClient {
    async fn embed_video(
        &self,
        asset_id: &str,
        tenant_index_id: &str,
    ) -> Result<VideoEmbedding, ProviderError> {
        self.with_retry("video embedding", || {
            self.fetch_video_once(asset_id, tenant_index_id)
        })
        .await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.with_retry("text embedding", || self.embed_text_once(text))
            .await
    }

    fn dimensions(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        "twelvelabs"
    }
}

// ============================================================================
// TESTS
// ============================================================================
