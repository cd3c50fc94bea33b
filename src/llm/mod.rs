//! Seam between the analyzer and whatever model answers its prompts.

pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::ChatCompletionsClient;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("backend returned no content")]
    EmptyResponse,

    #[error("invalid llm configuration: {0}")]
    Config(String),
}

/// Produces a completion for one prompt. Implementations must be safe to
/// call concurrently.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}
