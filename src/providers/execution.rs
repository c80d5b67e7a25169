//! Execution contracts for reply generation: timeout, retries, failure codes.

use std::time::Duration;
use thiserror::Error;

use super::provider::{ProviderError, ReplyGenerator};
use crate::config::ExecutionSettings;

#[derive(Debug, Clone)]
pub struct ExecutionContract {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ExecutionContract {
    fn default() -> Self {
        Self::from_settings(&ExecutionSettings::default())
    }
}

impl ExecutionContract {
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_seconds),
            retries: settings.retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    Timeout,
    Unauthorized,
    ProviderUnavailable,
    BadResponse,
    Unknown,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Timeout => write!(f, "timeout"),
            FailureCode::Unauthorized => write!(f, "unauthorized"),
            FailureCode::ProviderUnavailable => write!(f, "provider_unavailable"),
            FailureCode::BadResponse => write!(f, "bad_response"),
            FailureCode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reply generation failed for good; the attempt is dropped.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct GeneratorError {
    pub code: FailureCode,
    pub message: String,
}

/// Run one generation under the contract.
pub async fn generate_with_contract(
    generator: &dyn ReplyGenerator,
    system_instructions: &str,
    prompt: &str,
    contract: &ExecutionContract,
) -> Result<String, GeneratorError> {
    let attempts = contract.retries + 1;
    let mut last_error: Option<GeneratorError> = None;

    for attempt in 1..=attempts {
        let result = tokio::time::timeout(
            contract.timeout,
            generator.generate(system_instructions, prompt),
        )
        .await;

        match result {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) => {
                let err = classify_error(&e);
                tracing::warn!(
                    provider = generator.name(),
                    "Generation attempt {}/{} failed: {}",
                    attempt,
                    attempts,
                    err
                );
                last_error = Some(err);
            }
            Err(_) => {
                let err = GeneratorError {
                    code: FailureCode::Timeout,
                    message: format!(
                        "generation exceeded timeout of {}ms",
                        contract.timeout.as_millis()
                    ),
                };
                tracing::warn!(
                    provider = generator.name(),
                    "Generation attempt {}/{} timed out",
                    attempt,
                    attempts
                );
                last_error = Some(err);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(contract.retry_backoff).await;
        }
    }

    Err(last_error.unwrap_or(GeneratorError {
        code: FailureCode::Unknown,
        message: "generation failed for unknown reason".to_string(),
    }))
}

fn classify_error(error: &ProviderError) -> GeneratorError {
    let code = match error {
        ProviderError::ApiError { status: 401 | 403, .. } => FailureCode::Unauthorized,
        ProviderError::ApiError { status, .. } if *status >= 500 => {
            FailureCode::ProviderUnavailable
        }
        ProviderError::HttpError(e) if e.is_timeout() => FailureCode::Timeout,
        ProviderError::HttpError(e) if e.is_connect() => FailureCode::ProviderUnavailable,
        ProviderError::ParseError(_) | ProviderError::EmptyReply => FailureCode::BadResponse,
        _ => FailureCode::Unknown,
    };

    GeneratorError {
        code,
        message: error.to_string(),
    }
}
