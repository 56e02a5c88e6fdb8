use crate::knowledge::{Catalog, Faq, KnowledgeBase, Product, Recipe, Video};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// In-memory catalog seeded with the demo product line. Stands in for the
/// vector/SQL stores behind the same narrow trait.
pub struct SeedCatalog {
    catalog: Arc<Catalog>,
}

impl SeedCatalog {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(demo_catalog()),
        }
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

impl Default for SeedCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeBase for SeedCatalog {
    async fn catalog(&self) -> Result<Arc<Catalog>> {
        Ok(Arc::clone(&self.catalog))
    }
}

fn product(
    sku: &str,
    name: &str,
    url: &str,
    category: &str,
    series: Option<&str>,
    price: f64,
    decibels: f64,
    wattage: f64,
    features: &[&str],
) -> Product {
    Product {
        sku: sku.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        category: category.to_string(),
        series: series.map(str::to_string),
        price: Some(price),
        decibels: Some(decibels),
        wattage: Some(wattage),
        features: features.iter().map(|f| f.to_string()).collect(),
    }
}

fn faq(id: &str, question: &str, answer: &str, category: &str) -> Faq {
    Faq {
        id: id.to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        category: category.to_string(),
    }
}

fn demo_catalog() -> Catalog {
    let products = vec![
        product(
            "VM-ASC-X5",
            "Vitamix Ascent X5",
            "/shop/ascent-x5",
            "household",
            Some("Ascent"),
            749.95,
            84.0,
            1440.0,
            &["touchscreen", "presets", "self-detect", "variable-speed", "easy-clean"],
        ),
        product(
            "VM-ASC-A3500",
            "Vitamix Ascent A3500",
            "/shop/ascent-a3500",
            "household",
            Some("Ascent"),
            649.95,
            88.0,
            1400.0,
            &["touchscreen", "presets", "timer", "easy-grip", "easy-clean"],
        ),
        product(
            "VM-ASC-A2500",
            "Vitamix Ascent A2500",
            "/shop/ascent-a2500",
            "household",
            Some("Ascent"),
            549.95,
            89.0,
            1400.0,
            &["presets", "variable-speed", "easy-clean"],
        ),
        product(
            "VM-PRO-750",
            "Vitamix Propel 750",
            "/shop/propel-750",
            "household",
            Some("Propel"),
            629.95,
            78.0,
            1200.0,
            &["presets", "quiet-motor", "easy-clean"],
        ),
        product(
            "VM-EXP-E310",
            "Vitamix Explorian E310",
            "/shop/explorian-e310",
            "household",
            Some("Explorian"),
            349.95,
            94.0,
            1380.0,
            &["variable-speed", "pulse"],
        ),
        product(
            "VM-EXP-E520",
            "Vitamix Explorian E520",
            "/shop/explorian-e520",
            "household",
            Some("Explorian"),
            449.95,
            92.0,
            1400.0,
            &["presets", "pulse", "variable-speed"],
        ),
        product(
            "VM-LEG-5200",
            "Vitamix 5200 Legacy",
            "/shop/legacy-5200",
            "household",
            Some("Legacy"),
            479.95,
            96.0,
            1380.0,
            &["variable-speed", "tall-container"],
        ),
        product(
            "VM-IMM-625",
            "Vitamix Immersion Blender",
            "/shop/immersion-blender",
            "household",
            Some("Immersion"),
            169.95,
            85.0,
            625.0,
            &["lightweight", "one-hand", "easy-clean"],
        ),
        product(
            "VM-COM-VP3",
            "Vita-Prep 3",
            "/shop/vita-prep-3",
            "commercial",
            None,
            949.00,
            100.0,
            1500.0,
            &["nsf-certified", "high-volume", "variable-speed"],
        ),
    ];

    let faqs = vec![
        faq(
            "faq-warranty",
            "How long is the warranty?",
            "Household blenders carry a 10-year full warranty covering parts, performance, and two-way shipping.",
            "ownership",
        ),
        faq(
            "faq-cleaning",
            "How do I clean my blender?",
            "Blend warm water with a drop of dish soap on high for 60 seconds, then rinse. Ascent models have a self-cleaning preset.",
            "care",
        ),
        faq(
            "faq-hot-soup",
            "Can it really make hot soup?",
            "Yes. Friction from the blades heats soup to steaming in about six minutes, no stove required.",
            "cooking",
        ),
        faq(
            "faq-noise",
            "How loud are the machines?",
            "Most full-size models run between 84 and 96 decibels at top speed. The Propel series is tuned for quieter operation.",
            "product",
        ),
        faq(
            "faq-containers",
            "Are containers interchangeable?",
            "Ascent containers work across all Ascent and Propel bases. Legacy containers fit Legacy bases only.",
            "product",
        ),
        faq(
            "faq-financing",
            "Do you offer payment plans?",
            "Certified reconditioned models and monthly installment plans are available at checkout on qualifying orders.",
            "ownership",
        ),
        faq(
            "faq-commercial",
            "Which models are certified for commercial use?",
            "The Vita-Prep line is NSF-certified for restaurant and high-volume use.",
            "commercial",
        ),
        faq(
            "faq-texture",
            "Why is my smoothie gritty?",
            "Blend longer and add liquid first. Frozen fruit after liquid, greens in between, and ramp speed up gradually.",
            "cooking",
        ),
    ];

    let recipes = vec![
        Recipe {
            id: "rcp-green-smoothie".to_string(),
            title: "Green Smoothie".to_string(),
            url: "/recipes/green-smoothie".to_string(),
            category: "smoothies".to_string(),
            dietary: vec!["vegan".to_string(), "gluten-free".to_string()],
            ingredients: vec![
                "spinach".to_string(),
                "banana".to_string(),
                "pineapple".to_string(),
                "water".to_string(),
            ],
            steps: vec![
                "Add water, spinach, banana, and pineapple to the container in that order.".to_string(),
                "Start on the lowest speed and ramp to high over five seconds.".to_string(),
                "Blend on high for 45 seconds until completely smooth.".to_string(),
            ],
        },
        Recipe {
            id: "rcp-tomato-soup".to_string(),
            title: "Tomato Basil Soup".to_string(),
            url: "/recipes/tomato-basil-soup".to_string(),
            category: "soups".to_string(),
            dietary: vec!["vegetarian".to_string()],
            ingredients: vec![
                "tomatoes".to_string(),
                "basil".to_string(),
                "vegetable broth".to_string(),
                "garlic".to_string(),
            ],
            steps: vec![
                "Add broth, tomatoes, garlic, and basil to the container.".to_string(),
                "Blend on the hot-soup preset, or on high for six minutes.".to_string(),
                "Serve steaming, garnished with fresh basil.".to_string(),
            ],
        },
        Recipe {
            id: "rcp-almond-butter".to_string(),
            title: "Almond Butter".to_string(),
            url: "/recipes/almond-butter".to_string(),
            category: "nut-butters".to_string(),
            dietary: vec!["vegan".to_string(), "gluten-free".to_string()],
            ingredients: vec!["roasted almonds".to_string()],
            steps: vec![
                "Add four cups of roasted almonds to the container.".to_string(),
                "Blend on high, using the tamper to press almonds into the blades.".to_string(),
                "Stop when the butter flows freely, about one minute.".to_string(),
            ],
        },
        Recipe {
            id: "rcp-berry-sorbet".to_string(),
            title: "Berry Sorbet".to_string(),
            url: "/recipes/berry-sorbet".to_string(),
            category: "frozen-desserts".to_string(),
            dietary: vec!["vegan".to_string()],
            ingredients: vec![
                "frozen mixed berries".to_string(),
                "apple juice".to_string(),
            ],
            steps: vec![
                "Add juice then frozen berries to the container.".to_string(),
                "Blend on high using the tamper until four mounds form.".to_string(),
                "Serve immediately.".to_string(),
            ],
        },
        Recipe {
            id: "rcp-baby-puree".to_string(),
            title: "Sweet Potato Baby Puree".to_string(),
            url: "/recipes/sweet-potato-puree".to_string(),
            category: "baby-food".to_string(),
            dietary: vec!["gluten-free".to_string(), "dairy-free".to_string()],
            ingredients: vec!["steamed sweet potato".to_string(), "water".to_string()],
            steps: vec![
                "Add water and steamed sweet potato to the container.".to_string(),
                "Blend on medium until completely smooth, about 30 seconds.".to_string(),
            ],
        },
        Recipe {
            id: "rcp-salsa".to_string(),
            title: "Fresh Salsa".to_string(),
            url: "/recipes/fresh-salsa".to_string(),
            category: "sauces".to_string(),
            dietary: vec!["vegan".to_string(), "gluten-free".to_string()],
            ingredients: vec![
                "tomatoes".to_string(),
                "onion".to_string(),
                "jalapeno".to_string(),
                "cilantro".to_string(),
                "lime".to_string(),
            ],
            steps: vec![
                "Add all ingredients to the container.".to_string(),
                "Pulse five to eight times until chunky.".to_string(),
            ],
        },
    ];

    let videos = vec![
        Video {
            id: "vid-getting-started".to_string(),
            title: "Getting Started With Your Blender".to_string(),
            url: "/videos/getting-started".to_string(),
            topic: "basics".to_string(),
        },
        Video {
            id: "vid-smoothie-technique".to_string(),
            title: "The Perfect Smoothie, Every Time".to_string(),
            url: "/videos/perfect-smoothie".to_string(),
            topic: "smoothies".to_string(),
        },
        Video {
            id: "vid-hot-soup".to_string(),
            title: "Hot Soup From the Blender".to_string(),
            url: "/videos/hot-soup".to_string(),
            topic: "soups".to_string(),
        },
        Video {
            id: "vid-cleaning".to_string(),
            title: "Clean Your Blender in 60 Seconds".to_string(),
            url: "/videos/cleaning".to_string(),
            topic: "care".to_string(),
        },
        Video {
            id: "vid-nut-butter".to_string(),
            title: "Homemade Nut Butter Basics".to_string(),
            url: "/videos/nut-butter".to_string(),
            topic: "nut-butters".to_string(),
        },
    ];

    Catalog {
        products,
        faqs,
        recipes,
        videos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_catalog_is_populated() {
        let kb = SeedCatalog::new();
        let catalog = kb.catalog().await.unwrap();
        assert!(catalog.products.len() >= 8);
        assert!(catalog.faqs.len() >= 8);
        assert!(catalog.recipes.len() >= 5);
        assert!(catalog.videos.len() >= 5);
    }

    #[tokio::test]
    async fn skus_are_unique() {
        let kb = SeedCatalog::new();
        let catalog = kb.catalog().await.unwrap();
        let mut skus: Vec<&str> = catalog.products.iter().map(|p| p.sku.as_str()).collect();
        skus.sort_unstable();
        skus.dedup();
        assert_eq!(skus.len(), catalog.products.len());
    }
}
