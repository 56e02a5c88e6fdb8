use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// The closed set of page types the pipeline can generate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Product,
    Recipe,
    Blog,
    Support,
    Commercial,
    General,
}

/// Orthogonal context bits, independent of the winning type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFlag {
    Accessibility,
    Noise,
    Medical,
    Budget,
    Allergy,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub confidence: f64,
    pub keywords: BTreeSet<String>,
    pub flags: BTreeSet<ContextFlag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
}

impl Classification {
    pub fn has_flag(&self, flag: ContextFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Substring patterns per type. Longer patterns carry more specificity and
/// win score ties.
const PRODUCT_PATTERNS: &[&str] = &[
    "blender",
    "vitamix",
    "which",
    "buy",
    "should i buy",
    "best",
    "model",
    "motor",
    "container",
    "price",
    "review",
    "compare",
    "recommend",
    "machine",
    "watt",
    "horsepower",
];

const RECIPE_PATTERNS: &[&str] = &[
    "recipe",
    "how do i make",
    "how to make",
    "make",
    "smoothie",
    "soup",
    "ingredient",
    "cook",
    "bake",
    "prepare",
    "puree",
    "nut butter",
];

const BLOG_PATTERNS: &[&str] = &[
    "blog",
    "article",
    "tips",
    "guide",
    "learn about",
    "history of",
    "benefits of",
    "why",
];

const SUPPORT_PATTERNS: &[&str] = &[
    "help",
    "support",
    "troubleshoot",
    "not working",
    "broken",
    "repair",
    "error",
    "leak",
    "fix",
    "stopped working",
    "register",
    "manual",
];

const COMMERCIAL_PATTERNS: &[&str] = &[
    "commercial",
    "restaurant",
    "cafe",
    "business",
    "food truck",
    "high volume",
    "nsf",
    "bar program",
];

const ACCESSIBILITY_PATTERNS: &[&str] = &[
    "arthritis",
    "easy to use",
    "easy",
    "grip",
    "senior",
    "elderly",
    "accessible",
    "one hand",
    "tremor",
    "disability",
    "simple controls",
];

const NOISE_PATTERNS: &[&str] = &[
    "quiet", "noise", "loud", "decibel", "silent", "apartment", "baby sleeping",
];

const MEDICAL_PATTERNS: &[&str] = &[
    "medical",
    "doctor",
    "dysphagia",
    "diabetes",
    "blood pressure",
    "nutrition therapy",
    "recovery",
    "swallowing",
    "soft food diet",
];

const BUDGET_PATTERNS: &[&str] = &[
    "budget",
    "cheap",
    "affordable",
    "under $",
    "less than",
    "value",
    "deal",
];

const ALLERGY_PATTERNS: &[&str] = &[
    "allergy",
    "allergic",
    "nut-free",
    "peanut",
    "gluten",
    "dairy-free",
    "lactose",
];

/// Fixed deltas the flag lists add to the `product` score.
const ACCESSIBILITY_BOOST: f64 = 2.0;
const NOISE_BOOST: f64 = 2.0;
const MEDICAL_BOOST: f64 = 1.5;
const BUDGET_BOOST: f64 = 1.5;
const ALLERGY_BOOST: f64 = 1.5;

static BUDGET_DOLLAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex"));
static BUDGET_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*dollars?").expect("valid regex"));
static BUDGET_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)budget[^\d]*(\d+)").expect("valid regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "have", "what", "should", "can", "are", "was",
    "you", "your", "its", "has", "does", "how", "need", "from", "will",
];

/// Count of matched patterns plus the longest match as a specificity
/// tiebreak.
fn pattern_score(query: &str, patterns: &[&str]) -> (f64, usize) {
    let mut count = 0usize;
    let mut longest = 0usize;
    for pattern in patterns {
        if query.contains(pattern) {
            count += 1;
            longest = longest.max(pattern.len());
        }
    }
    (count as f64, longest)
}

fn extract_budget(query: &str) -> Option<u32> {
    for re in [&*BUDGET_DOLLAR_RE, &*BUDGET_WORD_RE, &*BUDGET_PREFIX_RE] {
        if let Some(caps) = re.captures(query)
            && let Ok(value) = caps[1].parse::<u32>()
            && value > 0
        {
            return Some(value);
        }
    }
    None
}

fn extract_keywords(query: &str) -> BTreeSet<String> {
    query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Classify a free-text query into a type with confidence plus orthogonal
/// context flags. Pure and deterministic: the same query always yields a
/// byte-identical classification.
pub fn classify(query: &str) -> Classification {
    let lower = query.to_lowercase();

    let mut flags = BTreeSet::new();
    let mut product_boost = 0.0;
    for (patterns, flag, boost) in [
        (ACCESSIBILITY_PATTERNS, ContextFlag::Accessibility, ACCESSIBILITY_BOOST),
        (NOISE_PATTERNS, ContextFlag::Noise, NOISE_BOOST),
        (MEDICAL_PATTERNS, ContextFlag::Medical, MEDICAL_BOOST),
        (BUDGET_PATTERNS, ContextFlag::Budget, BUDGET_BOOST),
        (ALLERGY_PATTERNS, ContextFlag::Allergy, ALLERGY_BOOST),
    ] {
        if patterns.iter().any(|p| lower.contains(p)) {
            flags.insert(flag);
            product_boost += boost;
        }
    }

    let budget = extract_budget(&lower);
    if budget.is_some() && flags.insert(ContextFlag::Budget) {
        product_boost += BUDGET_BOOST;
    }

    let mut scored: Vec<(QueryType, f64, usize)> = [
        (QueryType::Product, PRODUCT_PATTERNS),
        (QueryType::Recipe, RECIPE_PATTERNS),
        (QueryType::Blog, BLOG_PATTERNS),
        (QueryType::Support, SUPPORT_PATTERNS),
        (QueryType::Commercial, COMMERCIAL_PATTERNS),
    ]
    .into_iter()
    .map(|(ty, patterns)| {
        let (mut score, specificity) = pattern_score(&lower, patterns);
        if ty == QueryType::Product {
            score += product_boost;
        }
        (ty, score, specificity)
    })
    .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.2.cmp(&a.2))
    });

    let (winner, win_score, win_specificity) = scored[0];
    let (_, runner_score, runner_specificity) = scored[1];

    // A dead tie (same score and same specificity) defaults to general.
    let (query_type, confidence) = if win_score == 0.0
        || (win_score == runner_score && win_specificity == runner_specificity)
    {
        (QueryType::General, 0.5)
    } else {
        let confidence = (win_score / (win_score + runner_score + 1.0)).min(1.0);
        (winner, confidence)
    };

    Classification {
        query_type,
        confidence,
        keywords: extract_keywords(&lower),
        flags,
        budget,
    }
}
