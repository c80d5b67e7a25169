//! Reply generator trait.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Empty reply")]
    EmptyReply,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Black-box text generator behind every agent.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Produce reply text for `prompt` under the given persona.
    async fn generate(&self, system_instructions: &str, prompt: &str) -> Result<String>;
}

impl ProviderError {
    pub fn other(s: impl Into<String>) -> Self {
        ProviderError::Other(s.into())
    }
}
