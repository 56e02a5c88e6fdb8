use crate::classify::{Classification, ContextFlag, QueryType};
use crate::knowledge::{Faq, KnowledgeBase, Product, Recipe, RecordRef, Video};
use crate::logger::RequestLogger;
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;

const TOP_K_PRODUCTS: usize = 8;
const TOP_K_FAQS: usize = 8;
const TOP_K_VIDEOS: usize = 5;
const TOP_K_RECIPES: usize = 10;

/// Feature tags that mark a product as accessibility-friendly.
const ACCESSIBILITY_TAGS: &[&str] = &[
    "touchscreen",
    "presets",
    "easy-grip",
    "one-hand",
    "lightweight",
];

/// Static term-expansion map. A query keyword starting with the left-hand
/// term pulls in the right-hand synonyms before matching.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("arthritis", &["easy", "grip", "ergonomic", "senior", "mobility"]),
    ("quiet", &["noise", "decibel", "silent"]),
    ("loud", &["noise", "decibel"]),
    ("apartment", &["quiet", "compact"]),
    ("senior", &["easy", "grip", "simple"]),
    ("cheap", &["budget", "affordable", "value"]),
    ("baby", &["puree", "smooth", "gentle"]),
    ("smoothie", &["frozen", "fruit"]),
];

/// Budget scoring deltas; anything priced beyond the stretch factor is
/// dropped entirely when in-budget alternatives exist.
const WITHIN_BUDGET_BOOST: f64 = 0.5;
const OVER_BUDGET_PENALTY: f64 = -1.0;
const BUDGET_STRETCH: f64 = 1.2;

/// The top-K records per kind for one query. Owned clones of catalog rows;
/// downstream phases only ever borrow them.
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    pub products: Vec<Product>,
    pub faqs: Vec<Faq>,
    pub recipes: Vec<Recipe>,
    pub videos: Vec<Video>,
}

impl Retrieved {
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.products.len(),
            self.faqs.len(),
            self.recipes.len(),
            self.videos.len(),
        )
    }
}

pub struct Retriever {
    kb: Arc<dyn KnowledgeBase>,
}

impl Retriever {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Retrieve grounding records for a classified query: term expansion,
    /// classification-aware scoring, top-K per kind with stable tiebreaks.
    pub async fn retrieve(
        &self,
        classification: &Classification,
        log: &RequestLogger,
    ) -> Result<Retrieved> {
        let catalog = self.kb.catalog().await?;
        let keywords = expand_keywords(&classification.keywords);

        let mut products = rank(
            catalog.products.iter().map(RecordRef::Product),
            classification,
            &keywords,
        );
        if let Some(budget) = classification.budget {
            apply_budget_cap(&mut products, &catalog.products, budget);
        }
        let products = take_top(products, &catalog.products, TOP_K_PRODUCTS);

        let faqs = take_top(
            rank(
                catalog.faqs.iter().map(RecordRef::Faq),
                classification,
                &keywords,
            ),
            &catalog.faqs,
            TOP_K_FAQS,
        );
        let recipes = take_top(
            rank(
                catalog.recipes.iter().map(RecordRef::Recipe),
                classification,
                &keywords,
            ),
            &catalog.recipes,
            TOP_K_RECIPES,
        );
        let videos = take_top(
            rank(
                catalog.videos.iter().map(RecordRef::Video),
                classification,
                &keywords,
            ),
            &catalog.videos,
            TOP_K_VIDEOS,
        );

        let retrieved = Retrieved {
            products,
            faqs,
            recipes,
            videos,
        };
        log_gaps(&retrieved, classification, log);
        Ok(retrieved)
    }
}

fn expand_keywords(keywords: &BTreeSet<String>) -> BTreeSet<String> {
    let mut expanded = keywords.clone();
    for keyword in keywords {
        for (term, synonyms) in SYNONYMS {
            if keyword.starts_with(term) {
                expanded.extend(synonyms.iter().map(|s| s.to_string()));
            }
        }
    }
    expanded
}

/// Score one record: base keyword matches plus classification-conditional
/// boosts. Only products receive flag boosts.
fn score_record(record: RecordRef<'_>, c: &Classification, keywords: &BTreeSet<String>) -> f64 {
    let text = record.searchable_text();
    let mut score = keywords.iter().filter(|k| text.contains(k.as_str())).count() as f64;

    if let RecordRef::Product(p) = record {
        if c.has_flag(ContextFlag::Accessibility)
            && ACCESSIBILITY_TAGS.iter().any(|tag| p.has_feature(tag))
        {
            score += 2.0;
        }
        if c.has_flag(ContextFlag::Noise)
            && let Some(db) = p.decibels
        {
            // Linear boost inversely proportional to loudness.
            score += (110.0 - db) / 20.0;
        }
        if let Some(budget) = c.budget
            && let Some(price) = p.price
        {
            if price <= f64::from(budget) {
                score += WITHIN_BUDGET_BOOST;
            } else if price > f64::from(budget) * BUDGET_STRETCH {
                score += OVER_BUDGET_PENALTY;
            }
        }
    }
    score
}

/// Rank records of one kind, keeping positive scores only. Returns
/// `(index, score)` pairs sorted by score descending, id ascending.
fn rank<'a>(
    records: impl Iterator<Item = RecordRef<'a>>,
    c: &Classification,
    keywords: &BTreeSet<String>,
) -> Vec<(usize, f64)> {
    let mut scored: Vec<(usize, f64, String)> = records
        .enumerate()
        .map(|(i, r)| (i, score_record(r, c, keywords), r.id().to_string()))
        .filter(|(_, score, _)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });
    scored.into_iter().map(|(i, score, _)| (i, score)).collect()
}

/// Drop products priced beyond the stretch factor whenever at least one
/// ranked alternative sits at or below the budget.
fn apply_budget_cap(ranked: &mut Vec<(usize, f64)>, products: &[Product], budget: u32) {
    let budget = f64::from(budget);
    let has_affordable = ranked
        .iter()
        .any(|(i, _)| products[*i].price.is_some_and(|p| p <= budget));
    if has_affordable {
        ranked.retain(|(i, _)| {
            products[*i]
                .price
                .is_none_or(|p| p <= budget * BUDGET_STRETCH)
        });
    }
}

fn take_top<T: Clone>(ranked: Vec<(usize, f64)>, source: &[T], k: usize) -> Vec<T> {
    ranked
        .into_iter()
        .take(k)
        .map(|(i, _)| source[i].clone())
        .collect()
}

/// Which kinds a query type is expected to surface; unmet expectations are
/// logged as retrieval gaps.
fn expected_kinds(query_type: QueryType) -> &'static [&'static str] {
    match query_type {
        QueryType::Product => &["products", "faqs"],
        QueryType::Recipe => &["recipes", "videos"],
        QueryType::Support => &["faqs", "videos"],
        QueryType::Commercial => &["products", "faqs"],
        QueryType::Blog => &["recipes", "videos"],
        QueryType::General => &["products"],
    }
}

fn log_gaps(retrieved: &Retrieved, c: &Classification, log: &RequestLogger) {
    for kind in expected_kinds(c.query_type) {
        let empty = match *kind {
            "products" => retrieved.products.is_empty(),
            "faqs" => retrieved.faqs.is_empty(),
            "recipes" => retrieved.recipes.is_empty(),
            "videos" => retrieved.videos.is_empty(),
            _ => false,
        };
        if empty {
            log.warn(&format!(
                "retrieval-gap: no {kind} for {:?} query (flags: {:?})",
                c.query_type, c.flags
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::knowledge::SeedCatalog;

    fn retriever() -> Retriever {
        Retriever::new(Arc::new(SeedCatalog::new()))
    }

    fn log() -> RequestLogger {
        RequestLogger::new("test")
    }

    #[tokio::test]
    async fn product_query_returns_products() {
        let c = classify("Which Vitamix should I buy?");
        let r = retriever().retrieve(&c, &log()).await.unwrap();
        assert!(r.products.len() >= 3, "got {} products", r.products.len());
    }

    #[tokio::test]
    async fn arthritis_query_surfaces_accessible_products() {
        let c = classify("I have arthritis and need an easy blender");
        let r = retriever().retrieve(&c, &log()).await.unwrap();
        assert!(!r.products.is_empty());
        assert!(r.products.iter().any(|p| ACCESSIBILITY_TAGS
            .iter()
            .any(|tag| p.has_feature(tag))));
    }

    #[tokio::test]
    async fn noise_query_ranks_quietest_first() {
        let c = classify("What is the quietest Vitamix for apartments?");
        let r = retriever().retrieve(&c, &log()).await.unwrap();
        assert!(!r.products.is_empty());
        let quietest = r
            .products
            .iter()
            .filter_map(|p| p.decibels)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(r.products[0].decibels, Some(quietest));
    }

    #[tokio::test]
    async fn budget_cap_drops_expensive_products() {
        let c = classify("Best blender under $350");
        assert_eq!(c.budget, Some(350));
        let r = retriever().retrieve(&c, &log()).await.unwrap();
        assert!(!r.products.is_empty());
        for p in &r.products {
            let price = p.price.unwrap();
            assert!(
                price <= 350.0 * BUDGET_STRETCH,
                "{} priced {} exceeds stretch cap",
                p.sku,
                price
            );
        }
        // At least one strictly within budget
        assert!(r.products.iter().any(|p| p.price.unwrap() <= 350.0));
    }

    #[tokio::test]
    async fn recipe_query_finds_recipe_and_video() {
        let c = classify("How do I make a green smoothie?");
        let r = retriever().retrieve(&c, &log()).await.unwrap();
        assert!(r.recipes.iter().any(|rcp| rcp.id == "rcp-green-smoothie"));
        assert!(!r.videos.is_empty());
    }

    #[tokio::test]
    async fn ranking_is_stable_across_runs() {
        let c = classify("quiet blender for smoothies");
        let a = retriever().retrieve(&c, &log()).await.unwrap();
        let b = retriever().retrieve(&c, &log()).await.unwrap();
        let ids =
            |r: &Retrieved| r.products.iter().map(|p| p.sku.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn synonym_expansion_covers_arthritis() {
        let mut keywords = BTreeSet::new();
        keywords.insert("arthritis".to_string());
        let expanded = expand_keywords(&keywords);
        for term in ["easy", "grip", "ergonomic", "senior", "mobility"] {
            assert!(expanded.contains(term), "missing {term}");
        }
    }
}
