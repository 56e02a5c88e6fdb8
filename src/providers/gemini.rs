use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use crate::providers::base::{CompletionRequest, LLMProvider};
use crate::providers::check_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
    retry: RetryOptions,
}

impl GeminiProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_base_url(api_key, default_model, BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, default_model: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            base_url,
            client: http_client(),
            retry: RetryOptions::default(),
        }
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String> {
        let mut payload = json!({
            "contents": [{"role": "user", "parts": [{"text": req.prompt}]}],
            "generationConfig": {
                "maxOutputTokens": req.max_tokens,
                "temperature": req.temperature,
            },
        });
        if let Some(system) = req.system {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.default_model, self.api_key
        );
        let resp = retryable_fetch(self.client.post(&url).json(&payload), &self.retry)
            .await
            .context("Failed to reach Gemini API")?;
        let json = check_response(resp, "Gemini").await?;

        let text = json["candidates"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|c| c["content"]["parts"].as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.is_empty())
            .context("No candidates in Gemini response")?;
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
