use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use crate::providers::base::{CompletionRequest, LLMProvider};
use crate::providers::check_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
    retry: RetryOptions,
}

impl AnthropicProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_base_url(api_key, default_model, API_URL.to_string())
    }

    pub fn with_base_url(api_key: String, default_model: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            default_model: default_model
                .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            base_url,
            client: http_client(),
            retry: RetryOptions::claude(),
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String> {
        let mut payload = json!({
            "model": self.default_model,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "messages": [{"role": "user", "content": req.prompt}],
        });
        if let Some(system) = req.system {
            payload["system"] = json!(system);
        }

        let request = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);

        let resp = retryable_fetch(request, &self.retry)
            .await
            .context("Failed to reach Anthropic API")?;
        let json = check_response(resp, "Anthropic").await?;

        // Concatenate all text blocks in the response content.
        let text = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.is_empty())
            .context("No text content in Anthropic response")?;
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "claude"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
