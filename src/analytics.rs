use crate::analyzer::{Analyzer, Verdict};
use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use crate::logger::RequestLogger;
use crate::store::KvStore;
use crate::utils::{slugify, strip_tags};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const EVENT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const RECENT_QUERIES_CAP: usize = 50;
/// Fleet analysis runs at most once per hour unless forced.
const FLEET_ANALYSIS_INTERVAL_SECS: i64 = 3600;
/// Single-page verdicts are cached for a day.
const PAGE_ANALYSIS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const SUMMARY_WINDOW_DAYS: i64 = 30;

/// An inbound analytics event, the thin KV log's only write shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DailyStats {
    #[serde(default)]
    generations: u64,
    #[serde(default)]
    sessions: u64,
    #[serde(default)]
    conversions: u64,
    #[serde(default)]
    events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecentQuery {
    query: String,
    slug: String,
    at: String,
}

/// KV-backed analytics: the event log, daily aggregates, and the two
/// analyzer surfaces (fleet and single page).
pub struct Analytics {
    kv: Arc<dyn KvStore>,
    analyzer: Arc<Analyzer>,
    client: Client,
}

impl Analytics {
    pub fn new(kv: Arc<dyn KvStore>, analyzer: Arc<Analyzer>) -> Self {
        Self {
            kv,
            analyzer,
            client: http_client(),
        }
    }

    /// Record one event: append to the log, bump daily counters, and count
    /// a session start for the first event from an unseen session id.
    pub async fn track(&self, event: &TrackEvent) -> Result<()> {
        let ts = event.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        let key = format!("event:{}:{ts}", event.session_id);
        self.kv
            .put(&key, serde_json::to_string(event)?, Some(EVENT_TTL))
            .await?;

        // First event from an unseen session id counts as the session
        // start; explicit session_start events are not double-counted.
        let seen_key = format!("seen-session:{}", event.session_id);
        let new_session = self.kv.get(&seen_key).await?.is_none();
        if new_session {
            self.kv
                .put(&seen_key, "1".to_string(), Some(EVENT_TTL))
                .await?;
        }

        let daily_key = format!("daily:{}", Utc::now().format("%Y-%m-%d"));
        let mut stats: DailyStats = match self.kv.get(&daily_key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => DailyStats::default(),
        };
        stats.events += 1;
        if new_session {
            stats.sessions += 1;
        }
        match event.event_type.as_str() {
            "generation" => stats.generations += 1,
            "conversion" => stats.conversions += 1,
            _ => {}
        }
        self.kv
            .put(&daily_key, serde_json::to_string(&stats)?, Some(EVENT_TTL))
            .await?;
        Ok(())
    }

    /// Record a finished generation and remember its query for the fleet
    /// analyzer.
    pub async fn record_generation(
        &self,
        session_id: &str,
        query: &str,
        block_count: usize,
    ) -> Result<()> {
        self.track(&TrackEvent {
            event_type: "generation".to_string(),
            session_id: session_id.to_string(),
            timestamp: None,
            data: json!({"query": query, "blockCount": block_count}),
        })
        .await?;

        let mut recent: Vec<RecentQuery> = match self.kv.get("recent-queries").await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        recent.insert(
            0,
            RecentQuery {
                query: query.to_string(),
                slug: slugify(query),
                at: Utc::now().to_rfc3339(),
            },
        );
        recent.truncate(RECENT_QUERIES_CAP);
        self.kv
            .put(
                "recent-queries",
                serde_json::to_string(&recent)?,
                Some(EVENT_TTL),
            )
            .await?;
        Ok(())
    }

    /// Aggregate stats over the last 30 days plus the most common queries.
    pub async fn summary(&self) -> Result<Value> {
        let mut totals = DailyStats::default();
        let mut days = Vec::new();
        let today = Utc::now().date_naive();
        for offset in 0..SUMMARY_WINDOW_DAYS {
            let date = today - ChronoDuration::days(offset);
            let key = format!("daily:{}", date.format("%Y-%m-%d"));
            if let Some(raw) = self.kv.get(&key).await? {
                let stats: DailyStats = serde_json::from_str(&raw).unwrap_or_default();
                totals.generations += stats.generations;
                totals.sessions += stats.sessions;
                totals.conversions += stats.conversions;
                totals.events += stats.events;
                days.push(json!({"date": date.format("%Y-%m-%d").to_string(), "stats": stats}));
            }
        }

        let recent: Vec<RecentQuery> = match self.kv.get("recent-queries").await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for entry in &recent {
            *counts.entry(entry.query.as_str()).or_insert(0) += 1;
        }
        let mut top: Vec<(&str, u64)> = counts.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        top.truncate(10);

        Ok(json!({
            "windowDays": SUMMARY_WINDOW_DAYS,
            "totals": totals,
            "days": days,
            "topQueries": top
                .into_iter()
                .map(|(query, count)| json!({"query": query, "count": count}))
                .collect::<Vec<_>>(),
        }))
    }

    /// Analyze one live page, with a 24 h verdict cache per URL.
    pub async fn analyze_page(
        &self,
        url: &str,
        query: &str,
        log: &RequestLogger,
    ) -> Result<Verdict> {
        let cache_key = format!("page-analysis:{url}");
        let cached = self
            .kv
            .get(&cache_key)
            .await?
            .and_then(|raw| serde_json::from_str::<Verdict>(&raw).ok());
        if let Some(verdict) = cached {
            return Ok(verdict);
        }

        let resp = retryable_fetch(self.client.get(url), &RetryOptions::default())
            .await
            .context("failed to fetch target page")?;
        if !resp.status().is_success() {
            anyhow::bail!("target page returned status {}", resp.status());
        }
        let html = resp.text().await.context("failed to read target page")?;
        let text = strip_tags(&html);

        let verdict = self.analyzer.analyze(&text, query, url, log).await;
        self.kv
            .put(
                &cache_key,
                serde_json::to_string(&verdict)?,
                Some(PAGE_ANALYSIS_TTL),
            )
            .await?;
        Ok(verdict)
    }

    /// Fleet analysis over recently generated pages, rate-limited to one
    /// run per hour unless forced.
    pub async fn analyze_recent(&self, force: bool, log: &RequestLogger) -> Result<Value> {
        let cached = self
            .kv
            .get("analysis:latest")
            .await?
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
        if let Some(mut cached) = cached {
            let fresh = cached["at"]
                .as_str()
                .and_then(|at| chrono::DateTime::parse_from_rfc3339(at).ok())
                .is_some_and(|at| {
                    Utc::now().signed_duration_since(at).num_seconds()
                        < FLEET_ANALYSIS_INTERVAL_SECS
                });
            if fresh && !force {
                cached["cached"] = json!(true);
                return Ok(cached);
            }
        }

        let recent: Vec<RecentQuery> = match self.kv.get("recent-queries").await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        if recent.is_empty() {
            anyhow::bail!("no generated pages to analyze yet");
        }

        let digest = recent
            .iter()
            .take(5)
            .map(|r| format!("- \"{}\" (page: /{}) generated {}", r.query, r.slug, r.at))
            .collect::<Vec<_>>()
            .join("\n");
        let verdict = self
            .analyzer
            .analyze(&digest, "recently generated pages", "fleet", log)
            .await;

        let result = json!({
            "at": Utc::now().to_rfc3339(),
            "pageCount": recent.len().min(5),
            "verdict": verdict,
        });
        self.kv
            .put("analysis:latest", result.to_string(), Some(EVENT_TTL))
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionRequest, LLMProvider};
    use crate::store::MemoryKv;
    use async_trait::async_trait;

    struct StubAgent;

    #[async_trait]
    impl LLMProvider for StubAgent {
        async fn complete(&self, _req: CompletionRequest<'_>) -> anyhow::Result<String> {
            Ok(r#"{"overallScore": 70, "contentScore": 70, "layoutScore": 70,
                   "conversionScore": 70, "summary": "fine"}"#
                .to_string())
        }
        fn name(&self) -> &'static str {
            "stub"
        }
        fn default_model(&self) -> &str {
            "stub-1"
        }
    }

    fn analytics() -> Analytics {
        let agent: Arc<dyn LLMProvider> = Arc::new(StubAgent);
        Analytics::new(
            Arc::new(MemoryKv::new()),
            Arc::new(Analyzer::new(vec![Arc::clone(&agent)], agent)),
        )
    }

    fn event(session: &str, event_type: &str) -> TrackEvent {
        TrackEvent {
            event_type: event_type.to_string(),
            session_id: session.to_string(),
            timestamp: None,
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn first_event_counts_session_once() {
        let analytics = analytics();
        analytics.track(&event("s1", "page_view")).await.unwrap();
        analytics.track(&event("s1", "page_view")).await.unwrap();
        analytics.track(&event("s2", "session_start")).await.unwrap();

        let summary = analytics.summary().await.unwrap();
        assert_eq!(summary["totals"]["sessions"], 2);
        assert_eq!(summary["totals"]["events"], 3);
    }

    #[tokio::test]
    async fn generation_events_feed_recent_queries() {
        let analytics = analytics();
        analytics
            .record_generation("s1", "best blender", 4)
            .await
            .unwrap();
        analytics
            .record_generation("s1", "best blender", 3)
            .await
            .unwrap();

        let summary = analytics.summary().await.unwrap();
        assert_eq!(summary["totals"]["generations"], 2);
        assert_eq!(summary["topQueries"][0]["query"], "best blender");
        assert_eq!(summary["topQueries"][0]["count"], 2);
    }

    #[tokio::test]
    async fn fleet_analysis_is_rate_limited() {
        let analytics = analytics();
        analytics
            .record_generation("s1", "quiet blender", 4)
            .await
            .unwrap();
        let log = RequestLogger::new("t");

        let first = analytics.analyze_recent(false, &log).await.unwrap();
        assert!(first.get("cached").is_none());

        let second = analytics.analyze_recent(false, &log).await.unwrap();
        assert_eq!(second["cached"], true);

        let forced = analytics.analyze_recent(true, &log).await.unwrap();
        assert!(forced.get("cached").is_none());
    }

    #[tokio::test]
    async fn fleet_analysis_without_pages_errors() {
        let analytics = analytics();
        let log = RequestLogger::new("t");
        assert!(analytics.analyze_recent(false, &log).await.is_err());
    }
}
