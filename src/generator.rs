use crate::analyzer::parse::tolerant_json;
use crate::classify::{Classification, ContextFlag, QueryType};
use crate::knowledge::retrieval::Retrieved;
use crate::logger::RequestLogger;
use crate::providers::{CompletionRequest, LLMProvider};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Retrieved-facts section of the prompt is capped at this many characters.
const FACTS_CAP: usize = 8_000;
/// Minimum token-Jaccard similarity for a fuzzy link correction.
const FUZZY_THRESHOLD: f64 = 0.7;

/// The block names the model is allowed to suggest.
pub const BLOCK_NAMES: &[&str] = &[
    "hero",
    "cards",
    "faq-accordion",
    "cta-section",
    "step-by-step",
    "columns",
    "video-gallery",
];

/// A typed content unit the model is contracted to emit. `imageHint`
/// strings later seed image generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ContentAtom {
    Hero {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cta_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_hint: Option<String>,
    },
    Card {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_hint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
    },
    Faq {
        question: String,
        answer: String,
    },
    StepList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        steps: Vec<String>,
    },
    Column {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_hint: Option<String>,
    },
    Video {
        title: String,
        url: String,
    },
    Cta {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        cta_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
    },
}

/// What one generation call produces: atoms plus the model's block plan.
#[derive(Debug, Clone, Default)]
pub struct GeneratedContent {
    pub atoms: Vec<ContentAtom>,
    pub suggested_blocks: Vec<String>,
    pub recommended_product: Option<String>,
}

pub struct Generator {
    provider: Arc<dyn LLMProvider>,
}

impl Generator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Prompt the model with retrieved facts and session context, then parse
    /// its JSON into content atoms. A malformed response degrades to an
    /// empty atom set; it never aborts the pipeline.
    pub async fn generate(
        &self,
        query: &str,
        classification: &Classification,
        retrieved: &Retrieved,
        session: &Session,
        log: &RequestLogger,
    ) -> GeneratedContent {
        let system = system_instructions(classification);
        let prompt = format!(
            "{}\n\n{}\n\nUser query: {}",
            facts_section(retrieved),
            session_section(session),
            query
        );

        let raw = match self
            .provider
            .complete(CompletionRequest::new(&prompt).with_system(&system))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log.error("upstream", &format!("generation call failed: {e}"));
                return GeneratedContent::default();
            }
        };

        let Some(value) = tolerant_json(&raw) else {
            log.error("parse", "model returned no parseable JSON object");
            return GeneratedContent::default();
        };

        let mut content = parse_content(&value, log);
        correct_links(&mut content.atoms, retrieved, log);
        // Keep the model's pick only when it names a retrieved SKU.
        let model_pick = content
            .recommended_product
            .take()
            .filter(|sku| retrieved.products.iter().any(|p| &p.sku == sku));
        content.recommended_product =
            derive_recommendation(classification, retrieved).or(model_pick);
        content
    }
}

/// System prompt: closed block set, JSON-only contract, and tone guidance
/// conditioned on the classification flags.
fn system_instructions(c: &Classification) -> String {
    let mut out = String::from(
        "You compose content for a block-structured web page about high-performance blenders.\n\
         Respond with a single JSON object and nothing else: \
         {\"atoms\": [...], \"suggestedBlocks\": [...], \"recommendedProduct\": \"SKU\"}.\n\
         Each atom is one of: \
         {\"kind\":\"hero\",\"title\",\"subtitle\",\"ctaText\",\"imageHint\"}, \
         {\"kind\":\"card\",\"title\",\"body\",\"imageHint\",\"href\"}, \
         {\"kind\":\"faq\",\"question\",\"answer\"}, \
         {\"kind\":\"stepList\",\"title\",\"steps\"}, \
         {\"kind\":\"column\",\"title\",\"body\",\"imageHint\"}, \
         {\"kind\":\"video\",\"title\",\"url\"}, \
         {\"kind\":\"cta\",\"title\",\"body\",\"ctaText\",\"href\"}.\n",
    );
    out.push_str(&format!(
        "suggestedBlocks may only contain: {}.\n",
        BLOCK_NAMES.join(", ")
    ));
    out.push_str("Only reference facts from the provided records; never invent prices or specs.\n");

    if c.has_flag(ContextFlag::Medical) {
        out.push_str(
            "The visitor mentioned a health context. Write with empathy and practical care; \
             do not give medical advice.\n",
        );
    }
    if c.has_flag(ContextFlag::Budget) {
        out.push_str(
            "The visitor is price-conscious. Explain value plainly and lead with what the \
             money buys.\n",
        );
    }
    if c.has_flag(ContextFlag::Noise) {
        out.push_str("Noise matters to this visitor. Steer toward the quietest suitable models.\n");
    }
    if c.query_type == QueryType::Commercial {
        out.push_str(
            "This is a commercial buyer. Distinguish certified commercial equipment from \
             household machines.\n",
        );
    }
    out
}

/// Compact table projection of the retrieved records, capped at
/// [`FACTS_CAP`] characters.
fn facts_section(retrieved: &Retrieved) -> String {
    let mut out = String::from("Retrieved records:\n");

    if !retrieved.products.is_empty() {
        out.push_str("Products (sku | name | url | price | dB | features):\n");
        for p in &retrieved.products {
            out.push_str(&format!(
                "  {} | {} | {} | {} | {} | {}\n",
                p.sku,
                p.name,
                p.url,
                p.price.map_or("-".to_string(), |v| format!("${v:.2}")),
                p.decibels.map_or("-".to_string(), |v| format!("{v:.0}")),
                p.features.join(",")
            ));
        }
    }
    if !retrieved.faqs.is_empty() {
        out.push_str("FAQs (question | answer):\n");
        for f in &retrieved.faqs {
            out.push_str(&format!("  {} | {}\n", f.question, f.answer));
        }
    }
    if !retrieved.recipes.is_empty() {
        out.push_str("Recipes (id | title | url | steps):\n");
        for r in &retrieved.recipes {
            out.push_str(&format!(
                "  {} | {} | {} | {}\n",
                r.id,
                r.title,
                r.url,
                r.steps.join(" / ")
            ));
        }
    }
    if !retrieved.videos.is_empty() {
        out.push_str("Videos (title | url):\n");
        for v in &retrieved.videos {
            out.push_str(&format!("  {} | {}\n", v.title, v.url));
        }
    }

    if out.len() > FACTS_CAP {
        out.truncate(FACTS_CAP);
    }
    out
}

fn session_section(session: &Session) -> String {
    let recent: Vec<&str> = session
        .queries
        .iter()
        .take(5)
        .map(|q| q.query.as_str())
        .collect();
    format!(
        "Visitor context: journey stage {:?}; recent queries: [{}]; interests: [{}]",
        session.journey_stage,
        recent.join("; "),
        session.profile.interests.join(", ")
    )
}

/// Pull atoms and the block plan out of the model's JSON. Individually
/// malformed atoms are skipped, not fatal.
fn parse_content(value: &Value, log: &RequestLogger) -> GeneratedContent {
    let mut atoms = Vec::new();
    if let Some(raw_atoms) = value["atoms"].as_array() {
        for raw in raw_atoms {
            match serde_json::from_value::<ContentAtom>(raw.clone()) {
                Ok(atom) => atoms.push(atom),
                Err(e) => log.warn(&format!("skipping malformed atom: {e}")),
            }
        }
    }

    let suggested_blocks = value["suggestedBlocks"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let recommended_product = value["recommendedProduct"]
        .as_str()
        .map(str::to_string);

    GeneratedContent {
        atoms,
        suggested_blocks,
        recommended_product,
    }
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Token-set Jaccard similarity of two strings.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let (a, b) = (tokens(a), tokens(b));
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

/// Link candidates the correction pass may map model hrefs onto.
fn link_candidates(retrieved: &Retrieved) -> Vec<(String, String)> {
    let mut candidates = Vec::new();
    for p in &retrieved.products {
        candidates.push((p.name.clone(), p.url.clone()));
    }
    for r in &retrieved.recipes {
        candidates.push((r.title.clone(), r.url.clone()));
    }
    for v in &retrieved.videos {
        candidates.push((v.title.clone(), v.url.clone()));
    }
    candidates
}

/// Model-authored URLs are never trusted. Each href either matches a
/// canonical URL exactly, is fuzzy-corrected onto one, falls back to a
/// keyword match, or is dropped.
fn correct_links(atoms: &mut [ContentAtom], retrieved: &Retrieved, log: &RequestLogger) {
    let candidates = link_candidates(retrieved);

    for atom in atoms.iter_mut() {
        let (title, href) = match atom {
            ContentAtom::Card { title, href, .. } => (title.clone(), href),
            ContentAtom::Cta { title, href, .. } => (title.clone(), href),
            _ => continue,
        };
        let Some(url) = href.clone() else { continue };

        if candidates.iter().any(|(_, canonical)| canonical == &url) {
            continue; // canonical URL passed through untouched
        }

        let best_fuzzy = candidates
            .iter()
            .map(|(name, canonical)| (jaccard(&title, name), canonical))
            .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((score, canonical)) = best_fuzzy {
            log.info(&format!(
                "link corrected (fuzzy, {score:.2}): {url} -> {canonical}"
            ));
            *href = Some(canonical.clone());
            continue;
        }

        let title_tokens = tokens(&title);
        let keyword_match = candidates
            .iter()
            .find(|(name, _)| tokens(name).intersection(&title_tokens).next().is_some());
        if let Some((_, canonical)) = keyword_match {
            log.info(&format!("link corrected (keyword): {url} -> {canonical}"));
            *href = Some(canonical.clone());
        } else {
            log.warn(&format!("dropping unverifiable link: {url}"));
            *href = None;
        }
    }
}

/// Deterministic recommendation override. When the classification flags
/// warrant it, the recommendation is re-derived from the retrieved set
/// rather than trusted from the model.
fn derive_recommendation(c: &Classification, retrieved: &Retrieved) -> Option<String> {
    let products = &retrieved.products;
    if products.is_empty() {
        return None;
    }

    if c.has_flag(ContextFlag::Accessibility) {
        return products
            .iter()
            .find(|p| p.has_feature("touchscreen"))
            .or_else(|| products.iter().find(|p| p.has_feature("presets")))
            .map(|p| p.sku.clone());
    }
    if c.has_flag(ContextFlag::Noise) {
        return products
            .iter()
            .filter(|p| p.decibels.is_some())
            .min_by(|a, b| {
                a.decibels
                    .partial_cmp(&b.decibels)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.sku.clone());
    }
    if let Some(budget) = c.budget {
        return products
            .iter()
            .filter(|p| p.price.is_some_and(|price| price <= f64::from(budget)))
            .max_by(|a, b| {
                a.price
                    .partial_cmp(&b.price)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.sku.clone());
    }
    if c.has_flag(ContextFlag::Medical) || c.has_flag(ContextFlag::Allergy) {
        return products
            .iter()
            .find(|p| p.has_feature("easy-clean") || p.has_feature("variable-speed"))
            .map(|p| p.sku.clone());
    }
    None
}
