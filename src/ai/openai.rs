use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::prompts::{debug_messages, generation_messages, ChatMessage};
use super::{parse_output, AiGenerationRequest, AiModel, GenerationOutput, GenerationProvider, ProviderError};
use crate::config::AiConfig;

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiProvider {
    client: Client,
    config: AiConfig,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Option<Vec<Choice>>,
    error: Option<CompletionError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionError {
    message: String,
}

impl OpenAiProvider {
    pub fn new(config: AiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// `gpt-4` maps to the configured primary model; the other names are
    /// passed through for gateways that route them.
    fn model_for(&self, model: AiModel) -> String {
        match model {
            AiModel::Gpt4 => self.config.primary_model.clone(),
            other => other.as_str().to_string(),
        }
    }

    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured)?;
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to read response: {}", e)))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        parse_completion(&text)
    }

    /// Try the requested model, then the fallback model once.
    async fn complete_with_fallback(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        match self.complete(model, messages).await {
            Ok(text) => Ok(text),
            Err(ProviderError::NotConfigured) => Err(ProviderError::NotConfigured),
            Err(e) if model != self.config.fallback_model => {
                tracing::warn!(
                    "Model {} failed ({}), retrying with {}",
                    model,
                    e,
                    self.config.fallback_model
                );
                metrics::counter!(crate::api::metrics::AI_FALLBACK_TOTAL).increment(1);
                self.complete(&self.config.fallback_model, messages).await
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_completion(text: &str) -> Result<String, ProviderError> {
    let response: CompletionResponse = serde_json::from_str(text)
        .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(ProviderError::InvalidResponse(error.message));
    }

    response
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("no content in response".into()))
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, request: &AiGenerationRequest) -> Result<GenerationOutput, ProviderError> {
        let model = self.model_for(request.model);
        let text = self
            .complete_with_fallback(&model, &generation_messages(request))
            .await?;
        parse_output(request.task, &text)
    }

    async fn suggest_fix(
        &self,
        request: Option<&AiGenerationRequest>,
        logs: &str,
    ) -> Result<String, ProviderError> {
        let model = request
            .map(|r| self.model_for(r.model))
            .unwrap_or_else(|| self.config.primary_model.clone());
        let text = self
            .complete_with_fallback(&model, &debug_messages(request, logs))
            .await?;
        Ok(text.trim().to_string())
    }
}
