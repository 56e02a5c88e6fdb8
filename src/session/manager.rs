use crate::store::KvStore;
use crate::utils::alnum_id;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const MAX_RECENT_QUERIES: usize = 20;
/// Journey stage is derived from this many most-recent queries.
const JOURNEY_WINDOW: usize = 5;
const SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

static BUYING_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(buy|purchase|order|price|deal|discount|coupon|checkout|in stock)\b")
        .expect("valid regex")
});

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(vs\.?|versus|compare|comparison|difference|better|which|best)\b")
        .expect("valid regex")
});

static SPECIFIC_MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(a3500|a2500|a2300|e310|e520|5200|7500|750|x5|x3|x2|ascent|explorian|propel|immersion)\b")
        .expect("valid regex")
});

/// Keyword patterns that feed the inferred-interest profile.
static INTEREST_PATTERNS: &[(&str, &str)] = &[
    ("smoothie", "smoothies"),
    ("soup", "soups"),
    ("baby food", "baby-food"),
    ("nut butter", "nut-butters"),
    ("ice cream", "frozen-desserts"),
    ("sorbet", "frozen-desserts"),
    ("juice", "juicing"),
    ("dough", "baking"),
    ("grind", "grains"),
];

static DIETARY_PATTERNS: &[(&str, &str)] = &[
    ("vegan", "vegan"),
    ("keto", "keto"),
    ("gluten", "gluten-free"),
    ("dairy", "dairy-free"),
    ("paleo", "paleo"),
];

/// Three-valued progress toward purchase. Never moves below `Deciding`
/// once a conversion has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStage {
    Exploring,
    Comparing,
    Deciding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,
    pub query_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_url: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub preferred_series: Vec<String>,
    #[serde(default)]
    pub dietary_preferences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub queries: u64,
    pub conversions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Most recent first, bounded at 20.
    pub queries: VecDeque<QueryRecord>,
    #[serde(default)]
    pub profile: Profile,
    pub journey_stage: JourneyStage,
    #[serde(default)]
    pub totals: SessionTotals,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            queries: VecDeque::new(),
            profile: Profile::default(),
            journey_stage: JourneyStage::Exploring,
            totals: SessionTotals::default(),
        }
    }

    fn converted(&self) -> bool {
        self.totals.conversions > 0
    }

    fn derive_journey_stage(&self) -> JourneyStage {
        let recent: Vec<&QueryRecord> = self.queries.iter().take(JOURNEY_WINDOW).collect();

        if self.converted()
            || recent
                .iter()
                .any(|q| BUYING_INTENT_RE.is_match(&q.query))
        {
            return JourneyStage::Deciding;
        }
        if recent.iter().any(|q| {
            COMPARISON_RE.is_match(&q.query) || SPECIFIC_MODEL_RE.is_match(&q.query)
        }) || self.queries.len() >= 3
        {
            return JourneyStage::Comparing;
        }
        JourneyStage::Exploring
    }

    fn update_profile(&mut self, query: &str) {
        let lower = query.to_lowercase();
        for (pattern, interest) in INTEREST_PATTERNS {
            if lower.contains(pattern) && !self.profile.interests.iter().any(|i| i == interest) {
                self.profile.interests.push((*interest).to_string());
            }
        }
        for (pattern, pref) in DIETARY_PATTERNS {
            if lower.contains(pattern)
                && !self
                    .profile
                    .dietary_preferences
                    .iter()
                    .any(|p| p == pref)
            {
                self.profile.dietary_preferences.push((*pref).to_string());
            }
        }
        if let Some(series) = SPECIFIC_MODEL_RE
            .find(&lower)
            .map(|m| m.as_str().to_string())
            && !self.profile.preferred_series.contains(&series)
        {
            self.profile.preferred_series.push(series);
        }
    }
}

/// KV-backed session manager. All writes carry a 30-day TTL and rewrite
/// `last_activity`.
pub struct SessionManager {
    kv: Arc<dyn KvStore>,
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }

    /// Look up a session, creating one (with a synthesized id) when the id
    /// is absent or the lookup misses.
    pub async fn get_or_create(&self, id: Option<&str>) -> Result<Session> {
        let stored = match id.filter(|id| !id.is_empty()) {
            Some(id) => self.kv.get(&Self::key(id)).await?,
            None => None,
        };
        if let Some(raw) = stored {
            let session: Session =
                serde_json::from_str(&raw).context("failed to parse stored session")?;
            return Ok(session);
        }
        let id = id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(alnum_id);
        Ok(Session::new(id))
    }

    pub async fn save(&self, session: &mut Session) -> Result<()> {
        session.last_activity = Utc::now();
        let raw = serde_json::to_string(session).context("failed to serialize session")?;
        self.kv
            .put(&Self::key(&session.id), raw, Some(SESSION_TTL))
            .await
    }

    /// Record a query: prepend to the bounded deque, refresh the inferred
    /// profile, and recompute the journey stage.
    pub async fn add_query(
        &self,
        session: &mut Session,
        query: &str,
        query_type: &str,
        generated_url: Option<String>,
    ) -> Result<()> {
        session.queries.push_front(QueryRecord {
            query: query.to_string(),
            query_type: query_type.to_string(),
            generated_url,
            at: Utc::now(),
        });
        session.queries.truncate(MAX_RECENT_QUERIES);
        session.totals.queries += 1;
        session.update_profile(query);
        session.journey_stage = session.derive_journey_stage();
        self.save(session).await
    }

    /// Record a conversion; the journey stage pins at `Deciding`.
    pub async fn record_conversion(&self, session: &mut Session, url: &str) -> Result<()> {
        session.totals.conversions += 1;
        session.journey_stage = JourneyStage::Deciding;
        tracing::info!(session_id = %session.id, url, "conversion recorded");
        self.save(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn synthesizes_id_on_miss() {
        let mgr = manager();
        let session = mgr.get_or_create(None).await.unwrap();
        assert_eq!(session.id.len(), 16);
        assert!(session
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(session.journey_stage, JourneyStage::Exploring);
    }

    #[tokio::test]
    async fn save_and_reload_roundtrip() {
        let mgr = manager();
        let mut session = mgr.get_or_create(Some("abc123")).await.unwrap();
        mgr.add_query(&mut session, "green smoothie recipes", "recipe", None)
            .await
            .unwrap();

        let reloaded = mgr.get_or_create(Some("abc123")).await.unwrap();
        assert_eq!(reloaded.queries.len(), 1);
        assert_eq!(reloaded.queries[0].query, "green smoothie recipes");
        assert!(reloaded.profile.interests.contains(&"smoothies".to_string()));
    }

    #[tokio::test]
    async fn queries_deque_is_bounded() {
        let mgr = manager();
        let mut session = Session::new("s".into());
        for i in 0..25 {
            mgr.add_query(&mut session, &format!("query {i}"), "general", None)
                .await
                .unwrap();
        }
        assert_eq!(session.queries.len(), MAX_RECENT_QUERIES);
        // Newest first
        assert_eq!(session.queries[0].query, "query 24");
    }

    #[tokio::test]
    async fn journey_stage_progression() {
        let mgr = manager();
        let mut session = Session::new("s".into());

        mgr.add_query(&mut session, "what can a blender do", "general", None)
            .await
            .unwrap();
        assert_eq!(session.journey_stage, JourneyStage::Exploring);

        mgr.add_query(&mut session, "a3500 review", "product", None)
            .await
            .unwrap();
        assert_eq!(session.journey_stage, JourneyStage::Comparing);

        mgr.add_query(&mut session, "where to buy a3500", "product", None)
            .await
            .unwrap();
        assert_eq!(session.journey_stage, JourneyStage::Deciding);
    }

    #[tokio::test]
    async fn three_queries_reach_comparing() {
        let mgr = manager();
        let mut session = Session::new("s".into());
        for q in ["smoothie ideas", "soup ideas", "nut butter ideas"] {
            mgr.add_query(&mut session, q, "recipe", None).await.unwrap();
        }
        assert_eq!(session.journey_stage, JourneyStage::Comparing);
    }

    #[tokio::test]
    async fn conversion_pins_deciding() {
        let mgr = manager();
        let mut session = Session::new("s".into());
        mgr.record_conversion(&mut session, "/checkout/a3500")
            .await
            .unwrap();
        assert_eq!(session.journey_stage, JourneyStage::Deciding);

        // Later exploratory queries never demote the stage.
        mgr.add_query(&mut session, "what is a blender", "general", None)
            .await
            .unwrap();
        assert_eq!(session.journey_stage, JourneyStage::Deciding);
    }

    #[tokio::test]
    async fn dietary_preferences_inferred() {
        let mgr = manager();
        let mut session = Session::new("s".into());
        mgr.add_query(&mut session, "vegan smoothie with no gluten", "recipe", None)
            .await
            .unwrap();
        assert!(session
            .profile
            .dietary_preferences
            .contains(&"vegan".to_string()));
        assert!(session
            .profile
            .dietary_preferences
            .contains(&"gluten-free".to_string()));
    }
}
