pub mod catalog;
pub mod retrieval;

pub use catalog::SeedCatalog;
pub use retrieval::{Retrieved, Retriever};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A sellable product with the feature set the retriever scores against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub url: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decibels: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wattage: Option<f64>,
    pub features: Vec<String>,
}

impl Product {
    pub fn has_feature(&self, tag: &str) -> bool {
        self.features.iter().any(|f| f == tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Faq {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub title: String,
    pub url: String,
    pub category: String,
    pub dietary: Vec<String>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub url: String,
    pub topic: String,
}

/// Borrowed view over any knowledge record, the single scoring currency.
#[derive(Debug, Clone, Copy)]
pub enum RecordRef<'a> {
    Product(&'a Product),
    Faq(&'a Faq),
    Recipe(&'a Recipe),
    Video(&'a Video),
}

impl RecordRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            RecordRef::Product(p) => &p.sku,
            RecordRef::Faq(f) => &f.id,
            RecordRef::Recipe(r) => &r.id,
            RecordRef::Video(v) => &v.id,
        }
    }

    /// Lowercased text the keyword matcher runs over.
    pub fn searchable_text(&self) -> String {
        match self {
            RecordRef::Product(p) => format!(
                "{} {} {} {}",
                p.name,
                p.category,
                p.series.as_deref().unwrap_or(""),
                p.features.join(" ")
            )
            .to_lowercase(),
            RecordRef::Faq(f) => format!("{} {} {}", f.question, f.answer, f.category).to_lowercase(),
            RecordRef::Recipe(r) => format!(
                "{} {} {} {}",
                r.title,
                r.category,
                r.dietary.join(" "),
                r.ingredients.join(" ")
            )
            .to_lowercase(),
            RecordRef::Video(v) => format!("{} {}", v.title, v.topic).to_lowercase(),
        }
    }
}

/// Everything the retriever can read in one shot. Records are owned by the
/// catalog; the pipeline only ever borrows them.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub products: Vec<Product>,
    pub faqs: Vec<Faq>,
    pub recipes: Vec<Recipe>,
    pub videos: Vec<Video>,
}

/// Narrow read interface over the product/FAQ/recipe/video knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn catalog(&self) -> Result<Arc<Catalog>>;
}
