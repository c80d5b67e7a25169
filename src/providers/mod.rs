//! Reply generators (LLM backends).

use std::sync::Arc;

pub mod execution;
pub mod ollama;
pub mod provider;

pub use execution::{generate_with_contract, ExecutionContract, FailureCode, GeneratorError};
pub use ollama::OllamaGenerator;
pub use provider::{ProviderError, ReplyGenerator, Result};

use crate::config::Settings;

/// Generator factory.
pub fn create_generator(settings: &Settings) -> Arc<dyn ReplyGenerator> {
    Arc::new(OllamaGenerator::from_settings(&settings.models.ollama))
}
