pub mod parse;

use crate::logger::RequestLogger;
use crate::providers::{CompletionRequest, LLMProvider};
use self::parse::tolerant_json;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Page text fed to the agents is capped at this many characters.
const PAGE_TEXT_CAP: usize = 12_000;
const LIST_CAP: usize = 5;
const SUGGESTION_CAP: usize = 10;

fn score_from_number<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let raw = f64::deserialize(d)?;
    Ok(raw.clamp(0.0, 100.0).round() as u32)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub category: String,
    pub issue: String,
    pub suggestion: String,
    pub impact: String,
    pub effort: String,
}

/// One agent's (or the synthesized) scoring of a generated page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    #[serde(deserialize_with = "score_from_number")]
    pub overall_score: u32,
    #[serde(deserialize_with = "score_from_number")]
    pub content_score: u32,
    #[serde(deserialize_with = "score_from_number")]
    pub layout_score: u32,
    #[serde(deserialize_with = "score_from_number")]
    pub conversion_score: u32,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub top_issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

impl Verdict {
    /// Accept a candidate JSON object only when all four numeric scores are
    /// present.
    pub fn from_value(value: &Value) -> Option<Self> {
        for key in [
            "overallScore",
            "contentScore",
            "layoutScore",
            "conversionScore",
        ] {
            if !value.get(key).is_some_and(Value::is_number) {
                return None;
            }
        }
        serde_json::from_value(value.clone()).ok()
    }

    fn all_failed() -> Self {
        Self {
            overall_score: 0,
            content_score: 0,
            layout_score: 0,
            conversion_score: 0,
            summary: "All analysis agents failed".to_string(),
            strengths: Vec::new(),
            improvements: Vec::new(),
            top_issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Outcome of one agent in the fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct ModelResult {
    pub model: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fans one scoring prompt out to independent models in parallel and
/// reconciles their verdicts.
pub struct Analyzer {
    agents: Vec<Arc<dyn LLMProvider>>,
    reconciler: Arc<dyn LLMProvider>,
}

impl Analyzer {
    pub fn new(agents: Vec<Arc<dyn LLMProvider>>, reconciler: Arc<dyn LLMProvider>) -> Self {
        Self { agents, reconciler }
    }

    pub async fn analyze(
        &self,
        page_text: &str,
        query: &str,
        page_url: &str,
        log: &RequestLogger,
    ) -> Verdict {
        let prompt = scoring_prompt(page_text, query, page_url);

        let results = futures_util::future::join_all(self.agents.iter().map(|agent| {
            let prompt = prompt.clone();
            async move { run_agent(agent.as_ref(), &prompt).await }
        }))
        .await;

        for result in &results {
            if !result.success {
                log.warn(&format!(
                    "agent {} failed: {}",
                    result.model,
                    result
                        .error
                        .as_deref()
                        .or(result.parse_error.as_deref())
                        .unwrap_or("unknown")
                ));
            }
        }

        let verdicts: Vec<Verdict> = results
            .into_iter()
            .filter_map(|r| r.verdict)
            .collect();

        match verdicts.len() {
            0 => Verdict::all_failed(),
            1 => verdicts.into_iter().next().expect("len checked"),
            _ => self.synthesize(&verdicts, page_text, log).await,
        }
    }

    /// Merge multiple verdicts: ask a single reconciler model, falling back
    /// to deterministic average-scores synthesis when it fails.
    async fn synthesize(
        &self,
        verdicts: &[Verdict],
        page_text: &str,
        log: &RequestLogger,
    ) -> Verdict {
        let prompt = reconciler_prompt(verdicts, page_text);
        match self
            .reconciler
            .complete(CompletionRequest::new(&prompt).with_temperature(0.2))
            .await
        {
            Ok(raw) => {
                if let Some(verdict) = tolerant_json(&raw).as_ref().and_then(Verdict::from_value) {
                    return verdict;
                }
                log.warn("reconciler returned unusable JSON; averaging verdicts");
            }
            Err(e) => log.warn(&format!("reconciler failed: {e}; averaging verdicts")),
        }
        average_synthesis(verdicts)
    }
}

async fn run_agent(agent: &dyn LLMProvider, prompt: &str) -> ModelResult {
    let model = agent.name().to_string();
    match agent
        .complete(CompletionRequest::new(prompt).with_temperature(0.2))
        .await
    {
        Ok(raw) => match tolerant_json(&raw).as_ref().and_then(Verdict::from_value) {
            Some(verdict) => ModelResult {
                model,
                success: true,
                verdict: Some(verdict),
                parse_error: None,
                error: None,
            },
            None => ModelResult {
                model,
                success: false,
                verdict: None,
                parse_error: Some("no verdict object with all four scores".to_string()),
                error: None,
            },
        },
        Err(e) => ModelResult {
            model,
            success: false,
            verdict: None,
            parse_error: None,
            error: Some(e.to_string()),
        },
    }
}

fn scoring_prompt(page_text: &str, query: &str, page_url: &str) -> String {
    let mut text = page_text.to_string();
    if text.len() > PAGE_TEXT_CAP {
        text.truncate(PAGE_TEXT_CAP);
    }
    format!(
        "You are scoring a generated web page. Respond with strict JSON only, no prose:\n\
         {{\"overallScore\": 0-100, \"contentScore\": 0-100, \"layoutScore\": 0-100, \
         \"conversionScore\": 0-100, \"summary\": \"...\", \"strengths\": [...], \
         \"improvements\": [...], \"topIssues\": [...], \
         \"suggestions\": [{{\"category\": \"content|layout|conversion\", \"issue\": \"...\", \
         \"suggestion\": \"...\", \"impact\": \"high|medium|low\", \"effort\": \"high|medium|low\"}}]}}\n\
         Rubric: content = accuracy and usefulness for the query; layout = structure and \
         scannability; conversion = clarity of the next step.\n\n\
         Page URL: {page_url}\nOriginal query: {query}\n\nPage text:\n{text}"
    )
}

fn reconciler_prompt(verdicts: &[Verdict], page_text: &str) -> String {
    let mut text = page_text.to_string();
    if text.len() > PAGE_TEXT_CAP {
        text.truncate(PAGE_TEXT_CAP);
    }
    let verdicts_json = serde_json::to_string(verdicts).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Several independent reviewers scored the same page. Merge their verdicts into one, \
         resolving disagreements with your own judgment of the page text. Respond with strict \
         JSON in the same shape as the input verdicts.\n\nVerdicts:\n{verdicts_json}\n\n\
         Page text:\n{text}"
    )
}

fn impact_weight(level: &str) -> u32 {
    match level.to_lowercase().as_str() {
        "high" => 3,
        "medium" => 2,
        _ => 1,
    }
}

fn effort_inverse(level: &str) -> u32 {
    match level.to_lowercase().as_str() {
        "low" => 3,
        "medium" => 2,
        _ => 1,
    }
}

fn dedup_union(lists: impl Iterator<Item = Vec<String>>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in lists.flatten() {
        let key = item.to_lowercase();
        if seen.insert(key) {
            out.push(item);
            if out.len() == cap {
                break;
            }
        }
    }
    out
}

/// Deterministic fallback synthesis: integer-rounded mean scores, deduped
/// unions capped at five, and suggestions prioritized by impact over effort.
pub fn average_synthesis(verdicts: &[Verdict]) -> Verdict {
    let n = verdicts.len() as f64;
    let mean = |f: fn(&Verdict) -> u32| -> u32 {
        (verdicts.iter().map(|v| f(v) as f64).sum::<f64>() / n).round() as u32
    };

    let mut seen_issues = HashSet::new();
    let mut suggestions: Vec<Suggestion> = Vec::new();
    for suggestion in verdicts.iter().flat_map(|v| v.suggestions.iter()) {
        let key: String = suggestion.issue.to_lowercase().chars().take(50).collect();
        if seen_issues.insert(key) {
            suggestions.push(suggestion.clone());
        }
    }
    suggestions.sort_by_key(|s| {
        std::cmp::Reverse(impact_weight(&s.impact) * 2 + effort_inverse(&s.effort))
    });
    suggestions.truncate(SUGGESTION_CAP);

    let summary = verdicts
        .iter()
        .map(|v| v.summary.trim())
        .filter(|s| !s.is_empty())
        .max_by_key(|s| s.len())
        .unwrap_or("")
        .to_string();

    Verdict {
        overall_score: mean(|v| v.overall_score),
        content_score: mean(|v| v.content_score),
        layout_score: mean(|v| v.layout_score),
        conversion_score: mean(|v| v.conversion_score),
        summary,
        strengths: dedup_union(verdicts.iter().map(|v| v.strengths.clone()), LIST_CAP),
        improvements: dedup_union(verdicts.iter().map(|v| v.improvements.clone()), LIST_CAP),
        top_issues: dedup_union(verdicts.iter().map(|v| v.top_issues.clone()), LIST_CAP),
        suggestions,
    }
}
