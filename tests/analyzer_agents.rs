//! Analyzer fan-out against real provider transports (mocked upstreams).

use pagesmith::analyzer::Analyzer;
use pagesmith::logger::RequestLogger;
use pagesmith::providers::{
    AnthropicProvider, GeminiProvider, LLMProvider, OpenAIProvider,
};
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn verdict(overall: u32) -> String {
    format!(
        r#"{{"overallScore": {overall}, "contentScore": {overall}, "layoutScore": {overall},
            "conversionScore": {overall}, "summary": "scored {overall}",
            "strengths": ["direct answer"], "improvements": ["add specs"],
            "topIssues": [], "suggestions": []}}"#
    )
}

async fn anthropic_returning(text: &str) -> (MockServer, Arc<dyn LLMProvider>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": text}]
        })))
        .mount(&server)
        .await;
    let provider: Arc<dyn LLMProvider> = Arc::new(AnthropicProvider::with_base_url(
        "key".to_string(),
        None,
        format!("{}/v1/messages", server.uri()),
    ));
    (server, provider)
}

async fn gemini_returning(text: &str) -> (MockServer, Arc<dyn LLMProvider>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })))
        .mount(&server)
        .await;
    let provider: Arc<dyn LLMProvider> = Arc::new(GeminiProvider::with_base_url(
        "key".to_string(),
        None,
        server.uri(),
    ));
    (server, provider)
}

async fn openai_returning(text: &str) -> (MockServer, Arc<dyn LLMProvider>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        })))
        .mount(&server)
        .await;
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAIProvider::with_base_url(
        "key".to_string(),
        None,
        server.uri(),
    ));
    (server, provider)
}

async fn failing_provider() -> (MockServer, Arc<dyn LLMProvider>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"type": "invalid_request_error", "message": "nope"}
        })))
        .mount(&server)
        .await;
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAIProvider::with_base_url(
        "key".to_string(),
        None,
        server.uri(),
    ));
    (server, provider)
}

#[tokio::test]
async fn three_formats_average_when_reconciler_fails() {
    // One bare JSON verdict, one fenced, one buried in prose.
    let (_s1, claude) = anthropic_returning(&verdict(80)).await;
    let fenced = format!("```json\n{}\n```", verdict(70));
    let (_s2, gemini) = gemini_returning(&fenced).await;
    let prose = format!("Here are my thoughts on the page. {}", verdict(90));
    let (_s3, gpt) = openai_returning(&prose).await;
    let (_s4, reconciler) = failing_provider().await;

    let analyzer = Analyzer::new(vec![claude, gemini, gpt], reconciler);
    let verdict = analyzer
        .analyze("page text about blenders", "best blender", "/p/x", &RequestLogger::new("t"))
        .await;

    assert_eq!(verdict.overall_score, 80); // mean of 80, 70, 90
    assert_eq!(verdict.content_score, 80);
    // Shared strengths dedupe to one entry.
    assert_eq!(verdict.strengths, vec!["direct answer"]);
}

#[tokio::test]
async fn one_healthy_agent_carries_the_analysis() {
    let (_s1, claude) = anthropic_returning(&verdict(62)).await;
    let (_s2, broken_a) = failing_provider().await;
    let (_s3, broken_b) = failing_provider().await;
    let (_s4, reconciler) = failing_provider().await;

    let analyzer = Analyzer::new(vec![claude, broken_a, broken_b], reconciler);
    let verdict = analyzer
        .analyze("page", "q", "/p", &RequestLogger::new("t"))
        .await;
    assert_eq!(verdict.overall_score, 62);
    assert_eq!(verdict.summary, "scored 62");
}

#[tokio::test]
async fn total_failure_reports_itself() {
    let (_s1, a) = failing_provider().await;
    let (_s2, b) = failing_provider().await;
    let (_s3, reconciler) = failing_provider().await;

    let analyzer = Analyzer::new(vec![a, b], reconciler);
    let verdict = analyzer
        .analyze("page", "q", "/p", &RequestLogger::new("t"))
        .await;
    assert_eq!(verdict.overall_score, 0);
    assert_eq!(verdict.summary, "All analysis agents failed");
}
