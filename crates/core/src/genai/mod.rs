//! Generative model client abstractions and implementations.

mod anthropic;
mod ollama;
mod openai_image;

pub use anthropic::AnthropicTextClient;
pub use ollama::OllamaTextClient;
pub use openai_image::OpenAiImageClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::retry::Retryable;

/// Error type for generative model operations.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("not configured")]
    NotConfigured,

    /// Circuit breaker rejected the call without touching the dependency.
    #[error("circuit breaker open for dependency: {0}")]
    CircuitOpen(String),
}

impl Retryable for GenerationError {
    fn is_transient(&self) -> bool {
        match self {
            GenerationError::Http(_)
            | GenerationError::RateLimited
            | GenerationError::Timeout(_) => true,
            GenerationError::Api { status, .. } => *status >= 500,
            // An open breaker must abort the retry loop, not spin against it.
            GenerationError::Payload(_)
            | GenerationError::NotConfigured
            | GenerationError::CircuitOpen(_) => false,
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Request for a text generation.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// System prompt (instructions for the model)
    pub system: Option<String>,
    /// User message
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a text generation.
#[derive(Debug, Clone)]
pub struct TextResponse {
    /// The generated text
    pub text: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Model used
    pub model: String,
}

/// Trait for text generation clients.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name (e.g., "anthropic", "ollama")
    fn provider(&self) -> &str;

    /// Model name (e.g., "claude-3-haiku-20240307")
    fn model(&self) -> &str;

    /// Send a generation request and get a text response.
    async fn generate(&self, request: TextRequest) -> Result<TextResponse, GenerationError>;
}

/// Send a generation request and parse the response as JSON.
///
/// A free function rather than a trait method so `TextGenerator` stays usable
/// as a trait object.
pub async fn generate_json<T: DeserializeOwned>(
    client: &dyn TextGenerator,
    request: TextRequest,
) -> Result<(T, TokenUsage), GenerationError> {
    let response = client.generate(request).await?;
    let text = strip_code_fences(&response.text);
    let parsed: T = serde_json::from_str(text)
        .map_err(|e| GenerationError::Payload(format!("{}: {}", e, response.text)))?;
    Ok((parsed, response.usage))
}

/// Trait for image generation clients.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Provider name (e.g., "openai")
    fn provider(&self) -> &str;

    /// Model name (e.g., "dall-e-3")
    fn model(&self) -> &str;

    /// Generate one image from a prompt and return the raw bytes.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError>;
}

/// Models often wrap JSON replies in markdown code fences despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
