//! Ollama HTTP provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::provider::{ProviderError, ReplyGenerator, Result};
use crate::config::OllamaSettings;

pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new() -> Self {
        Self::from_settings(&OllamaSettings::default())
    }

    pub fn from_settings(settings: &OllamaSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for OllamaGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, system_instructions: &str, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system: system_instructions,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let reply = body.response.trim();
        if reply.is_empty() {
            return Err(ProviderError::EmptyReply);
        }
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            model: "llama3.2",
            prompt: "will it rain?",
            system: "",
            stream: false,
            options: GenerateOptions {
                temperature: 0.2,
                num_predict: None,
            },
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "llama3.2");
        assert_eq!(value["stream"], false);
        assert!(value.get("system").is_none());
        assert!(value["options"].get("num_predict").is_none());
    }

    #[test]
    fn test_from_settings_trims_base_url() {
        let settings = OllamaSettings {
            base_url: "http://ollama:11434/".to_string(),
            ..Default::default()
        };
        let generator = OllamaGenerator::from_settings(&settings);
        assert_eq!(generator.base_url, "http://ollama:11434");
        assert_eq!(generator.model(), "llama3.2");
    }
}
