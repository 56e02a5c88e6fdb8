use async_trait::async_trait;

/// A single-shot completion request. The pipeline's prompts are fully
/// assembled strings; providers only add transport framing.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            system: None,
            prompt,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A large language model reachable over HTTP. Retries and timeouts come
/// from the fetch fabric preset each implementation carries.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, req: CompletionRequest<'_>) -> anyhow::Result<String>;

    /// Short provider label used in logs and analyzer verdicts.
    fn name(&self) -> &'static str;

    fn default_model(&self) -> &str;
}
