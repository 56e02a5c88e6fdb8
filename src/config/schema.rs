use serde::Deserialize;

/// Process configuration, assembled from environment variables by
/// [`crate::config::load_from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: ProviderKeys,
    pub vertex: Option<VertexConfig>,
    pub persistence: PersistenceConfig,
}

/// API keys for the three model providers.
#[derive(Debug, Clone)]
pub struct ProviderKeys {
    pub anthropic: String,
    pub google_ai: String,
    pub openai: String,
}

/// Vertex image-model configuration. Absent when image generation is
/// disabled; the pipeline then serves static fallbacks only.
#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub service_account: ServiceAccountKey,
    pub project_id: String,
    pub location: String,
}

/// The fields we need from a Google service-account JSON key.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Content-repository (DA) configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub org: String,
    pub repo: String,
    /// Publish ref, always "main" unless overridden for staging.
    pub branch: String,
    pub credentials: DaCredentials,
}

/// How we authenticate against the content repository.
#[derive(Debug, Clone)]
pub enum DaCredentials {
    /// Service-account credentials exchanged at the IMS endpoint for a
    /// short-lived access token.
    Service {
        client_id: String,
        client_secret: String,
        service_token: String,
    },
    /// Preconfigured static bearer token.
    Static { token: String },
    /// Persistence disabled; `/api/persist` returns an error.
    Disabled,
}

impl PersistenceConfig {
    pub fn enabled(&self) -> bool {
        !matches!(self.credentials, DaCredentials::Disabled)
    }
}
