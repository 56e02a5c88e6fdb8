use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use pagesmith::analytics::Analytics;
use pagesmith::analyzer::Analyzer;
use pagesmith::config::{self, Config};
use pagesmith::gateway::{self, AppState};
use pagesmith::generator::Generator;
use pagesmith::images::{ImageModel, ImageWorker, VertexImageModel};
use pagesmith::knowledge::{SeedCatalog, retrieval::Retriever};
use pagesmith::persist::DaClient;
use pagesmith::providers::{AnthropicProvider, GeminiProvider, LLMProvider, OpenAIProvider};
use pagesmith::session::SessionManager;
use pagesmith::store::{MemoryBlobStore, MemoryKv};
use pagesmith::stream::Pipeline;

#[derive(Parser)]
#[command(name = "pagesmith", version, about = "Generative web page pipeline")]
struct Args {
    /// Address the gateway listens on.
    #[arg(long, default_value = "0.0.0.0:8787", env = "BIND_ADDR")]
    bind: SocketAddr,
}

fn build_state(config: &Config) -> AppState {
    let kv = Arc::new(MemoryKv::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let knowledge = Arc::new(SeedCatalog::new());

    let anthropic: Arc<dyn LLMProvider> =
        Arc::new(AnthropicProvider::new(config.providers.anthropic.clone(), None));
    let gemini: Arc<dyn LLMProvider> =
        Arc::new(GeminiProvider::new(config.providers.google_ai.clone(), None));
    let openai: Arc<dyn LLMProvider> =
        Arc::new(OpenAIProvider::new(config.providers.openai.clone(), None));

    let image_model = config
        .vertex
        .as_ref()
        .map(|v| Arc::new(VertexImageModel::new(v)) as Arc<dyn ImageModel>);
    let images = Arc::new(ImageWorker::new(image_model, blob.clone()));

    let sessions = Arc::new(SessionManager::new(kv.clone()));
    let analyzer = Arc::new(Analyzer::new(
        vec![anthropic.clone(), gemini, openai],
        anthropic.clone(),
    ));
    let analytics = Arc::new(Analytics::new(kv.clone(), analyzer));

    let pipeline = Arc::new(Pipeline::new(
        Retriever::new(knowledge),
        Generator::new(anthropic),
        images,
        sessions.clone(),
        analytics.clone(),
    ));

    let da = config
        .persistence
        .enabled()
        .then(|| Arc::new(DaClient::new(config.persistence.clone())));

    AppState {
        pipeline,
        analytics,
        sessions,
        blob,
        da,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().expect("valid default filter"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = config::load_from_env()?;
    let app = gateway::router(build_state(&config));

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, version = pagesmith::VERSION, "pagesmith listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
