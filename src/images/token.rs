use crate::config::schema::ServiceAccountKey;
use crate::fetch::{RetryOptions, http_client, retryable_fetch};
use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-wide holder for the image provider's OAuth token: a signed
/// RS256 assertion is exchanged for an access token with roughly an hour
/// of life. Refreshes are not deduplicated; the later writer wins and both
/// tokens stay valid until the issuer expires them.
pub struct GoogleTokenCache {
    key: ServiceAccountKey,
    client: Client,
    inner: Mutex<Option<CachedToken>>,
}

impl GoogleTokenCache {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            client: http_client(),
            inner: Mutex::new(None),
        }
    }

    /// Current access token, refreshing when missing or near expiry.
    pub async fn token(&self) -> Result<String> {
        if let Some(cached) = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            && cached.valid()
        {
            return Ok(cached.token);
        }
        self.refresh().await
    }

    /// Drop the cached token, forcing the next caller to refresh. Called on
    /// auth failures from the image API.
    pub fn invalidate(&self) {
        *self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    async fn refresh(&self) -> Result<String> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before epoch")?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .context("service account private key is not valid RSA PEM")?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .context("failed to sign token assertion")?;

        let request = self.client.post(&self.key.token_uri).form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ]);
        let resp = retryable_fetch(request, &RetryOptions::default())
            .await
            .context("token exchange request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("token endpoint returned unreadable JSON")?;
        if !status.is_success() {
            anyhow::bail!("token exchange rejected ({status}): {body}");
        }

        let token = body["access_token"]
            .as_str()
            .context("token response missing access_token")?
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);

        let cached = CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in).saturating_sub(EXPIRY_BUFFER),
        };
        *self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(cached);

        Ok(token)
    }
}
