use crate::config::schema::{DaCredentials, PersistenceConfig};
use crate::errors::{PagesmithError, PagesmithResult};
use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SOURCE_BASE: &str = "https://admin.da.live";
const PUBLISH_BASE: &str = "https://admin.hlx.page";
const IMS_URL: &str = "https://ims-na1.adobelogin.com/ims/token/v3";
/// IMS tokens live 24 h; refresh an hour early.
const TOKEN_TTL: Duration = Duration::from_secs(23 * 60 * 60);

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub preview_url: String,
    pub live_url: String,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Credentialed client for the external content repository. Writes follow
/// a strict source → preview → live → cache-purge chain; each step retries
/// once on 401 after evicting the cached token.
pub struct DaClient {
    client: Client,
    config: PersistenceConfig,
    source_base: String,
    publish_base: String,
    ims_url: String,
    token: Mutex<Option<CachedToken>>,
    retry: RetryOptions,
}

impl DaClient {
    pub fn new(config: PersistenceConfig) -> Self {
        Self::with_bases(
            config,
            SOURCE_BASE.to_string(),
            PUBLISH_BASE.to_string(),
            IMS_URL.to_string(),
        )
    }

    pub fn with_bases(
        config: PersistenceConfig,
        source_base: String,
        publish_base: String,
        ims_url: String,
    ) -> Self {
        Self {
            client: http_client(),
            config,
            source_base,
            publish_base,
            ims_url,
            token: Mutex::new(None),
            retry: RetryOptions::default(),
        }
    }

    fn invalidate_token(&self) {
        *self
            .token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    async fn token(&self) -> PagesmithResult<String> {
        match &self.config.credentials {
            DaCredentials::Static { token } => Ok(token.clone()),
            DaCredentials::Disabled => Err(PagesmithError::Config(
                "persistence is not configured".to_string(),
            )),
            DaCredentials::Service {
                client_id,
                client_secret,
                service_token,
            } => {
                if let Some(cached) = self
                    .token
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone()
                    && Instant::now() < cached.expires_at
                {
                    return Ok(cached.token);
                }

                let request = self.client.post(&self.ims_url).form(&[
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("code", service_token.as_str()),
                    ("grant_type", "authorization_code"),
                ]);
                let resp = retryable_fetch(request, &self.retry)
                    .await
                    .map_err(|e| PagesmithError::Auth(format!("IMS exchange failed: {e}")))?;
                let status = resp.status();
                let body: serde_json::Value = resp.json().await.map_err(|e| {
                    PagesmithError::Auth(format!("IMS returned unreadable JSON: {e}"))
                })?;
                if !status.is_success() {
                    return Err(PagesmithError::Auth(format!(
                        "IMS rejected credentials ({status}): {body}"
                    )));
                }
                let token = body["access_token"]
                    .as_str()
                    .ok_or_else(|| {
                        PagesmithError::Auth("IMS response missing access_token".to_string())
                    })?
                    .to_string();

                *self
                    .token
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(CachedToken {
                    token: token.clone(),
                    expires_at: Instant::now() + TOKEN_TTL,
                });
                Ok(token)
            }
        }
    }

    /// Send a credentialed request; on 401, evict the token and retry once.
    async fn authed(
        &self,
        build: impl Fn(&Client, &str) -> RequestBuilder,
    ) -> PagesmithResult<Response> {
        let token = self.token().await?;
        let resp = retryable_fetch(build(&self.client, &token), &self.retry)
            .await
            .map_err(|e| PagesmithError::Upstream {
                message: e.to_string(),
                retryable: false,
            })?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        self.invalidate_token();
        let token = self.token().await?;
        retryable_fetch(build(&self.client, &token), &self.retry)
            .await
            .map_err(|e| PagesmithError::Upstream {
                message: e.to_string(),
                retryable: false,
            })
    }

    fn check_step(step: &str, resp: &Response) -> PagesmithResult<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(PagesmithError::Upstream {
                message: format!("{step} failed with status {}", resp.status()),
                retryable: false,
            })
        }
    }

    /// Persist a page and publish it: write the source document, then push
    /// it through preview and live, then purge the edge cache (best-effort).
    pub async fn persist_and_publish(
        &self,
        path: &str,
        html: &str,
    ) -> PagesmithResult<PublishResult> {
        if !path.starts_with('/') || path.contains("..") {
            return Err(PagesmithError::Input(format!("invalid page path: {path}")));
        }
        let org = &self.config.org;
        let repo = &self.config.repo;
        let branch = &self.config.branch;

        let source_url = format!("{}/source/{org}/{repo}{path}.html", self.source_base);
        let resp = self
            .authed(|client, token| {
                client
                    .put(&source_url)
                    .bearer_auth(token)
                    .header("content-type", "text/html")
                    .body(html.to_string())
            })
            .await?;
        Self::check_step("source write", &resp)?;

        let preview_url = format!("{}/preview/{org}/{repo}/{branch}{path}", self.publish_base);
        let resp = self
            .authed(|client, token| client.post(&preview_url).bearer_auth(token))
            .await?;
        Self::check_step("preview publish", &resp)?;

        let live_url = format!("{}/live/{org}/{repo}/{branch}{path}", self.publish_base);
        let resp = self
            .authed(|client, token| client.post(&live_url).bearer_auth(token))
            .await?;
        Self::check_step("live publish", &resp)?;

        // Cache purge is best-effort; a failure is logged, never raised.
        let cache_url = format!("{}/cache/{org}/{repo}/{branch}{path}", self.publish_base);
        match self
            .authed(|client, token| client.post(&cache_url).bearer_auth(token))
            .await
        {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "cache purge failed"),
            Err(e) => warn!("cache purge failed: {e}"),
        }

        let result = PublishResult {
            preview_url: format!("https://{branch}--{repo}--{org}.aem.page{path}"),
            live_url: format!("https://{branch}--{repo}--{org}.aem.live{path}"),
        };
        info!(path, live = %result.live_url, "page published");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_config() -> PersistenceConfig {
        PersistenceConfig {
            org: "acme".to_string(),
            repo: "pages".to_string(),
            branch: "main".to_string(),
            credentials: DaCredentials::Service {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                service_token: "stoken".to_string(),
            },
        }
    }

    fn client_for(server: &MockServer, config: PersistenceConfig) -> DaClient {
        DaClient::with_bases(
            config,
            server.uri(),
            server.uri(),
            format!("{}/ims/token/v3", server.uri()),
        )
    }

    async fn mount_happy_publish(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/preview/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/live/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cache/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn full_chain_publishes_and_returns_urls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ims/token/v3"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ims-token", "expires_in": 86399
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/source/acme/pages/p/test.html"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        mount_happy_publish(&server).await;

        let client = client_for(&server, service_config());
        let result = client
            .persist_and_publish("/p/test", "<html></html>")
            .await
            .unwrap();
        assert_eq!(result.preview_url, "https://main--pages--acme.aem.page/p/test");
        assert_eq!(result.live_url, "https://main--pages--acme.aem.live/p/test");
    }

    #[tokio::test]
    async fn retries_once_on_401_after_token_refresh() {
        let server = MockServer::start().await;
        // Two IMS exchanges: initial token plus the refresh after the 401.
        Mock::given(method("POST"))
            .and(path("/ims/token/v3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ims-token", "expires_in": 86399
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/source/acme/pages/p/test.html"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/source/acme/pages/p/test.html"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        mount_happy_publish(&server).await;

        let client = client_for(&server, service_config());
        assert!(client.persist_and_publish("/p/test", "<html></html>").await.is_ok());
    }

    #[tokio::test]
    async fn cache_purge_failure_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/source/acme/pages/p/test.html"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/preview/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/live/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cache/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = PersistenceConfig {
            credentials: DaCredentials::Static {
                token: "static-token".to_string(),
            },
            ..service_config()
        };
        let client = client_for(&server, config);
        assert!(client.persist_and_publish("/p/test", "<html></html>").await.is_ok());
    }

    #[tokio::test]
    async fn live_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/source/acme/pages/p/test.html"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/preview/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/live/acme/pages/main/p/test"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let config = PersistenceConfig {
            credentials: DaCredentials::Static {
                token: "static-token".to_string(),
            },
            ..service_config()
        };
        let client = client_for(&server, config);
        let err = client
            .persist_and_publish("/p/test", "<html></html>")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("live publish"));
    }

    #[tokio::test]
    async fn disabled_credentials_reject_immediately() {
        let server = MockServer::start().await;
        let config = PersistenceConfig {
            credentials: DaCredentials::Disabled,
            ..service_config()
        };
        let client = client_for(&server, config);
        let err = client
            .persist_and_publish("/p/test", "<html></html>")
            .await
            .unwrap_err();
        assert!(matches!(err, PagesmithError::Config(_)));
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let server = MockServer::start().await;
        let client = client_for(&server, service_config());
        assert!(matches!(
            client.persist_and_publish("/p/../evil", "x").await,
            Err(PagesmithError::Input(_))
        ));
        assert!(matches!(
            client.persist_and_publish("no-slash", "x").await,
            Err(PagesmithError::Input(_))
        ));
    }
}
