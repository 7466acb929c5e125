//! Model provider abstraction layer.
//!
//! The pipeline never performs inference itself — it treats the model as
//! an opaque text generator behind the [`ModelProvider`] trait. One
//! implementation ships here: [`ollama::OllamaProvider`], speaking the
//! Ollama `/api/chat` API of a local endpoint.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod ollama;

/// A request for text generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The prompt to complete.
    pub prompt: String,
    /// Generation mode hint (e.g. "knowledge", "planning", "code_analysis").
    pub mode: Option<String>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Build a plain request from a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: None,
            max_tokens: None,
        }
    }

    /// Attach a mode hint.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse failed: {0}")]
    Parse(String),
    /// The endpoint answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// Opaque text generator the pipeline calls through the registry's `ai` tool.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;

    /// Generate a completion, sending text fragments to `tokens` in order.
    ///
    /// Returns the full concatenated text when the stream ends. The default
    /// implementation generates in one call and emits a single fragment.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<String, ProviderError> {
        let text = self.generate(request).await?;
        let _ = tokens.send(text.clone()).await;
        Ok(text)
    }

    /// Whether [`generate_stream`](Self::generate_stream) produces true
    /// incremental output rather than one final fragment.
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Truncate a response body for error messages.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        body.to_owned()
    } else {
        let truncated: String = body.chars().take(max).collect();
        format!("{truncated}…")
    }
}
