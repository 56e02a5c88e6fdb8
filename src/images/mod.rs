pub mod token;

pub use token::GoogleTokenCache;

use crate::config::schema::VertexConfig;
use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use crate::logger::RequestLogger;
use crate::store::BlobStore;
use crate::utils::hash64;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Concurrent image generations per request.
const DEFAULT_CONCURRENCY: usize = 3;

/// The size classes a hint marker may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSize {
    Hero,
    Card,
    Column,
    Thumbnail,
}

impl ImageSize {
    fn from_class_token(token: &str) -> Option<Self> {
        match token {
            "hero" => Some(Self::Hero),
            "card" => Some(Self::Card),
            "column" => Some(Self::Column),
            "thumbnail" => Some(Self::Thumbnail),
            _ => None,
        }
    }

    fn aspect_ratio(self) -> &'static str {
        match self {
            Self::Hero => "16:9",
            Self::Card | Self::Thumbnail => "1:1",
            Self::Column => "3:4",
        }
    }

    /// Static fallback served when a generation fails and no sibling of the
    /// same size succeeded.
    fn fallback_url(self) -> &'static str {
        match self {
            Self::Hero => "/static/fallback-hero.png",
            Self::Card => "/static/fallback-card.png",
            Self::Column => "/static/fallback-column.png",
            Self::Thumbnail => "/static/fallback-thumbnail.png",
        }
    }
}

/// One pending generation, scanned out of rendered block HTML. Lives until
/// it has produced a blob URL or been mapped to a fallback.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub id: String,
    pub prompt: String,
    pub size: ImageSize,
    pub slug: String,
}

/// Attribute list of one tag body, double-quoted values only (which is all
/// the renderer emits).
fn parse_attrs(tag: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = tag.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        // Attribute name
        let mut name_end = start + c.len_utf8();
        for (i, c) in chars.by_ref() {
            if c == '=' || c.is_whitespace() {
                name_end = i;
                break;
            }
            name_end = i + c.len_utf8();
        }
        let name = tag[start..name_end].to_string();

        // Value, only when double-quoted
        let mut value = String::new();
        if let Some(&(_, '"')) = chars.peek() {
            chars.next();
            for (_, c) in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        }
        if !name.is_empty() {
            attrs.push((name, value));
        }
    }
    attrs
}

/// Scan rendered HTML for `<img>` hint markers and build image requests.
/// This walks actual tag structure; hint-shaped text in text nodes is never
/// picked up.
pub fn extract_image_requests(html: &str, slug: &str) -> Vec<ImageRequest> {
    let mut requests = Vec::new();
    let mut rest = html;

    while let Some(start) = rest.find("<img") {
        let tag_body = &rest[start + 4..];
        let Some(end) = tag_body.find('>') else { break };
        let attrs = parse_attrs(&tag_body[..end]);

        let get = |name: &str| {
            attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| html_escape::decode_html_entities(v).into_owned())
        };

        if let (Some(id), Some(prompt)) = (get("data-image-id"), get("data-image-prompt")) {
            let size = get("class").and_then(|classes| {
                classes
                    .split_whitespace()
                    .find_map(ImageSize::from_class_token)
            });
            if let Some(size) = size
                && !requests.iter().any(|r: &ImageRequest| r.id == id)
            {
                requests.push(ImageRequest {
                    id,
                    prompt,
                    size,
                    slug: slug.to_string(),
                });
            }
        }
        rest = &tag_body[end..];
    }
    requests
}

/// An image generation backend: prompt in, PNG bytes out.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>>;
}

/// Vertex AI image model behind the process-wide token cache.
pub struct VertexImageModel {
    client: Client,
    token: Arc<GoogleTokenCache>,
    endpoint: String,
    retry: RetryOptions,
}

impl VertexImageModel {
    const MODEL: &'static str = "imagen-3.0-generate-002";

    pub fn new(config: &VertexConfig) -> Self {
        let endpoint = format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = config.location,
            proj = config.project_id,
            model = Self::MODEL,
        );
        Self::with_endpoint(config, endpoint)
    }

    pub fn with_endpoint(config: &VertexConfig, endpoint: String) -> Self {
        Self {
            client: http_client(),
            token: Arc::new(GoogleTokenCache::new(config.service_account.clone())),
            endpoint,
            retry: RetryOptions::image_model(),
        }
    }

    async fn predict(&self, prompt: &str, size: ImageSize) -> Result<reqwest::Response> {
        let token = self.token.token().await?;
        let payload = serde_json::json!({
            "instances": [{"prompt": prompt}],
            "parameters": {"sampleCount": 1, "aspectRatio": size.aspect_ratio()},
        });
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&payload);
        retryable_fetch(request, &self.retry)
            .await
            .context("image generation request failed")
    }
}

#[async_trait]
impl ImageModel for VertexImageModel {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>> {
        let mut resp = self.predict(prompt, size).await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Stale token; evict and retry once with a fresh one.
            self.token.invalidate();
            resp = self.predict(prompt, size).await?;
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("image model rejected request ({status}): {body}");
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("image model returned unreadable JSON")?;
        let encoded = body["predictions"]
            .as_array()
            .and_then(|p| p.first())
            .and_then(|p| p["bytesBase64Encoded"].as_str())
            .context("image model response missing image bytes")?;
        BASE64
            .decode(encoded)
            .context("image bytes are not valid base64")
    }
}

/// Runs a batch of image generations with bounded concurrency, stores the
/// results, and substitutes fallbacks for failures.
pub struct ImageWorker {
    model: Option<Arc<dyn ImageModel>>,
    blob: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl ImageWorker {
    pub fn new(model: Option<Arc<dyn ImageModel>>, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            model,
            blob,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[cfg(test)]
    fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    async fn generate_one(&self, req: &ImageRequest) -> Result<String> {
        let model = self
            .model
            .as_ref()
            .context("image model not configured")?;
        let bytes = model.generate(&req.prompt, req.size).await?;
        let key = format!("{}/{}.png", req.slug, req.id);
        self.blob.put(&key, bytes).await?;
        Ok(format!("/images/{key}"))
    }

    /// Process a batch: every request resolves to a URL — its own blob, a
    /// sibling of the same size, or the static fallback. Output order
    /// follows the input. Cancelling the token aborts in-flight fetches and
    /// keeps queued requests from starting; a cancelled batch returns empty.
    pub async fn process(
        &self,
        requests: Vec<ImageRequest>,
        log: &RequestLogger,
        cancel: &CancellationToken,
    ) -> Vec<(String, String)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let attempts = futures_util::future::join_all(requests.into_iter().map(|req| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let work = async {
                    let _permit = semaphore.acquire().await;
                    self.generate_one(&req).await
                };
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        log.debug(&format!("image {} cancelled", req.id));
                        (req, None)
                    }
                    result = work => match result {
                        Ok(url) => (req, Some(url)),
                        Err(e) => {
                            log.warn(&format!("image {} failed: {e}", req.id));
                            (req, None)
                        }
                    }
                }
            }
        }))
        .await;

        if cancel.is_cancelled() {
            return Vec::new();
        }

        // Successful URLs per size, for sibling substitution.
        let mut siblings: HashMap<ImageSize, Vec<String>> = HashMap::new();
        for (req, url) in &attempts {
            if let Some(url) = url {
                siblings.entry(req.size).or_default().push(url.clone());
            }
        }

        attempts
            .into_iter()
            .map(|(req, url)| {
                let url = url.unwrap_or_else(|| {
                    match siblings.get(&req.size).filter(|s| !s.is_empty()) {
                        Some(candidates) => {
                            let pick = (hash64(&req.id) % candidates.len() as u64) as usize;
                            candidates[pick].clone()
                        }
                        None => req.size.fallback_url().to_string(),
                    }
                });
                (req.id, url)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn extracts_hint_markers_from_img_tags() {
        let html = r#"<div><img class="gen-image hero" data-image-id="abc123" data-image-prompt="a blender &quot;hero&quot; shot" src="/images/p/abc123.png" alt="x"><p>text</p></div>"#;
        let requests = extract_image_requests(html, "p");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "abc123");
        assert_eq!(requests[0].size, ImageSize::Hero);
        assert_eq!(requests[0].prompt, "a blender \"hero\" shot");
    }

    #[test]
    fn ignores_hint_shaped_text_nodes() {
        let html = r#"<p>try data-image-id="evil" data-image-prompt="injected" here</p>"#;
        assert!(extract_image_requests(html, "p").is_empty());
    }

    #[test]
    fn ignores_imgs_without_markers_and_dedupes() {
        let html = concat!(
            r#"<img src="/plain.png" alt="no marker">"#,
            r#"<img class="gen-image card" data-image-id="dup" data-image-prompt="p" src="">"#,
            r#"<img class="gen-image card" data-image-id="dup" data-image-prompt="p" src="">"#,
        );
        let requests = extract_image_requests(html, "p");
        assert_eq!(requests.len(), 1);
    }

    struct FlakyModel {
        fail_ids: Vec<&'static str>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl ImageModel for FlakyModel {
        async fn generate(&self, prompt: &str, _size: ImageSize) -> Result<Vec<u8>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_ids.iter().any(|f| prompt.contains(f)) {
                anyhow::bail!("synthetic failure");
            }
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
    }

    fn request(id: &str, size: ImageSize) -> ImageRequest {
        ImageRequest {
            id: id.to_string(),
            prompt: format!("prompt {id}"),
            size,
            slug: "page".to_string(),
        }
    }

    #[tokio::test]
    async fn failed_image_gets_sibling_of_same_size() {
        let model = Arc::new(FlakyModel {
            fail_ids: vec!["img-b"],
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let worker = ImageWorker::new(Some(model), Arc::new(MemoryBlobStore::new()));
        let results = worker
            .process(
                vec![
                    request("img-a", ImageSize::Card),
                    request("img-b", ImageSize::Card),
                ],
                &RequestLogger::new("t"),
                &CancellationToken::new(),
            )
            .await;

        let urls: HashMap<_, _> = results.into_iter().collect();
        assert_eq!(urls["img-a"], "/images/page/img-a.png");
        // img-b failed, but a card-size sibling exists.
        assert_eq!(urls["img-b"], "/images/page/img-a.png");
    }

    #[tokio::test]
    async fn all_failed_falls_back_to_static_urls() {
        let model = Arc::new(FlakyModel {
            fail_ids: vec!["img-a", "img-b"],
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let worker = ImageWorker::new(Some(model), Arc::new(MemoryBlobStore::new()));
        let results = worker
            .process(
                vec![
                    request("img-a", ImageSize::Hero),
                    request("img-b", ImageSize::Thumbnail),
                ],
                &RequestLogger::new("t"),
                &CancellationToken::new(),
            )
            .await;

        let urls: HashMap<_, _> = results.into_iter().collect();
        assert_eq!(urls["img-a"], "/static/fallback-hero.png");
        assert_eq!(urls["img-b"], "/static/fallback-thumbnail.png");
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let model = Arc::new(FlakyModel {
            fail_ids: vec![],
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let worker = ImageWorker::new(Some(Arc::clone(&model) as Arc<dyn ImageModel>), Arc::new(MemoryBlobStore::new()))
            .with_concurrency(2);
        let requests = (0..8)
            .map(|i| request(&format!("img-{i}"), ImageSize::Card))
            .collect();
        let results = worker
            .process(requests, &RequestLogger::new("t"), &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 8);
        assert!(model.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn missing_model_uses_fallbacks() {
        let worker = ImageWorker::new(None, Arc::new(MemoryBlobStore::new()));
        let results = worker
            .process(
                vec![request("img-a", ImageSize::Column)],
                &RequestLogger::new("t"),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results[0].1, "/static/fallback-column.png");
    }

    #[tokio::test]
    async fn cancelled_batch_skips_queued_work_and_returns_empty() {
        let model = Arc::new(FlakyModel {
            fail_ids: vec![],
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let worker = ImageWorker::new(
            Some(Arc::clone(&model) as Arc<dyn ImageModel>),
            Arc::new(MemoryBlobStore::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let requests = (0..4)
            .map(|i| request(&format!("img-{i}"), ImageSize::Card))
            .collect();
        let results = worker
            .process(requests, &RequestLogger::new("t"), &cancel)
            .await;
        assert!(results.is_empty());
        // A pre-cancelled token keeps every generation from starting.
        assert_eq!(model.max_active.load(Ordering::SeqCst), 0);
    }
}
