use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use crate::providers::base::{CompletionRequest, LLMProvider};
use crate::providers::check_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
    retry: RetryOptions,
}

impl OpenAIProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_base_url(api_key, default_model, API_URL.to_string())
    }

    pub fn with_base_url(api_key: String, default_model: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gpt-4o".to_string()),
            base_url,
            client: http_client(),
            retry: RetryOptions::default(),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = req.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": req.prompt}));

        let payload = json!({
            "model": self.default_model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        let request = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&payload);
        let resp = retryable_fetch(request, &self.retry)
            .await
            .context("Failed to reach OpenAI API")?;
        let json = check_response(resp, "OpenAI").await?;

        let text = json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|c| c["message"]["content"].as_str())
            .map(str::to_string)
            .context("No choices in OpenAI response")?;
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gpt"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn complete_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::with_base_url("key".to_string(), None, server.uri());
        let text = provider
            .complete(CompletionRequest::new("hi").with_system("be brief"))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }
}
