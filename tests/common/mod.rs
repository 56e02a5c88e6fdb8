// Shared test helpers — not every item is used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use pagesmith::analytics::Analytics;
use pagesmith::analyzer::Analyzer;
use pagesmith::gateway::AppState;
use pagesmith::generator::Generator;
use pagesmith::images::{ImageModel, ImageWorker};
use pagesmith::knowledge::{SeedCatalog, retrieval::Retriever};
use pagesmith::providers::{CompletionRequest, LLMProvider};
use pagesmith::session::SessionManager;
use pagesmith::store::{MemoryBlobStore, MemoryKv};
use pagesmith::stream::Pipeline;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A provider that replays scripted responses, then repeats the last one.
pub struct ScriptedProvider {
    label: &'static str,
    responses: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(label: &'static str, responses: Vec<&str>) -> Self {
        Self {
            label,
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(label: &'static str) -> Self {
        Self {
            label,
            responses: Mutex::new(VecDeque::from([Err("synthetic provider failure".to_string())])),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, req: CompletionRequest<'_>) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(req.prompt.to_string());
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => {
                *self.last.lock().unwrap() = Some(text.clone());
                Ok(text)
            }
            Some(Err(e)) => Err(anyhow::anyhow!("{e}")),
            None => match self.last.lock().unwrap().clone() {
                Some(text) => Ok(text),
                None => Err(anyhow::anyhow!("no scripted response")),
            },
        }
    }

    fn name(&self) -> &'static str {
        self.label
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }
}

/// A generation response that exercises every block template the pipeline
/// renders, with canonical catalog links and image hints.
pub const FULL_GENERATION_RESPONSE: &str = r#"{
    "atoms": [
        {"kind": "hero", "title": "Find the Right Blender", "subtitle": "Matched to how you cook",
         "ctaText": "See picks", "imageHint": "a blender surrounded by fresh produce"},
        {"kind": "card", "title": "Vitamix Ascent X5", "body": "Top of the line, with presets.",
         "imageHint": "sleek touchscreen blender", "href": "/shop/ascent-x5"},
        {"kind": "card", "title": "Vitamix Explorian E310", "body": "The essentials, for less.",
         "href": "https://invented.example/e310"},
        {"kind": "faq", "question": "How long is the warranty?", "answer": "Ten years, full coverage."},
        {"kind": "stepList", "title": "Green Smoothie", "steps": ["Add liquid first.", "Pile in greens.", "Blend on high for 45 seconds."]},
        {"kind": "cta", "title": "Ready when you are", "ctaText": "Shop blenders", "href": "/shop/ascent-x5"}
    ],
    "suggestedBlocks": ["hero", "cards", "faq-accordion", "step-by-step", "cta-section"],
    "recommendedProduct": "VM-ASC-X5"
}"#;

pub fn pipeline_with(provider: Arc<ScriptedProvider>) -> Pipeline {
    pipeline_with_model(provider, None)
}

/// Pipeline with a caller-supplied image model, for image-phase tests.
pub fn pipeline_with_model(
    provider: Arc<ScriptedProvider>,
    image_model: Option<Arc<dyn ImageModel>>,
) -> Pipeline {
    let kv = Arc::new(MemoryKv::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let agent: Arc<dyn LLMProvider> = provider.clone();
    let analyzer = Arc::new(Analyzer::new(vec![agent.clone()], agent.clone()));

    Pipeline::new(
        Retriever::new(Arc::new(SeedCatalog::new())),
        Generator::new(provider),
        Arc::new(ImageWorker::new(image_model, blob)),
        Arc::new(SessionManager::new(kv.clone())),
        Arc::new(Analytics::new(kv, analyzer)),
    )
}

/// App state wired with in-memory stores and a scripted model, for gateway
/// tests.
pub fn test_state(provider: Arc<ScriptedProvider>) -> AppState {
    let kv = Arc::new(MemoryKv::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let agent: Arc<dyn LLMProvider> = provider.clone();
    let analyzer = Arc::new(Analyzer::new(vec![agent.clone()], agent.clone()));
    let analytics = Arc::new(Analytics::new(kv.clone(), analyzer));
    let sessions = Arc::new(SessionManager::new(kv));

    let pipeline = Arc::new(Pipeline::new(
        Retriever::new(Arc::new(SeedCatalog::new())),
        Generator::new(provider),
        Arc::new(ImageWorker::new(None, blob.clone())),
        sessions.clone(),
        analytics.clone(),
    ));

    AppState {
        pipeline,
        analytics,
        sessions,
        blob,
        da: None,
    }
}
