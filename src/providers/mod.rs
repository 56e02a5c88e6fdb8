pub mod anthropic;
pub mod base;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use base::{CompletionRequest, LLMProvider};
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;

use anyhow::Result;
use reqwest::Response;
use serde_json::Value;

/// Read a provider response body, turning a non-success status into a
/// readable error. Retryable statuses were already consumed by the fetch
/// fabric, so anything non-2xx here is terminal.
pub(crate) async fn check_response(resp: Response, provider: &str) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(parse_api_error(provider, status.as_u16(), &text));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| anyhow::anyhow!("{provider} returned unreadable JSON: {e}"))
}

/// Pull the provider's structured error message out of an error body when
/// there is one, falling back to the raw text.
pub(crate) fn parse_api_error(provider: &str, status: u16, body: &str) -> anyhow::Error {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let error = &json["error"];
        let error_type = error["type"]
            .as_str()
            .or_else(|| error["status"].as_str())
            .unwrap_or("unknown");
        if let Some(message) = error["message"].as_str() {
            return anyhow::anyhow!("{provider} API error ({error_type}): {message}");
        }
    }
    anyhow::anyhow!("{provider} API error ({status}): {body}")
}
