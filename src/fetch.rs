use reqwest::{Client, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Connect timeout for outbound HTTP clients (seconds).
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Backoff delays are capped here regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Statuses retried by default: rate limit plus transient server errors.
const DEFAULT_RETRY_ON: &[u16] = &[429, 500, 502, 503, 504];
/// Anthropic's overload status, retried by the claude preset.
const ANTHROPIC_OVERLOADED: u16 = 529;

/// Observer invoked before each retry sleep, mainly for tests.
pub type OnRetry = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Options controlling [`retryable_fetch`]. Use the per-provider presets
/// where one exists.
#[derive(Clone)]
pub struct RetryOptions {
    /// Per-attempt timeout; a timed-out attempt counts as retryable.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base backoff delay, doubled each attempt with uniform jitter.
    pub retry_delay: Duration,
    pub retry_on: Vec<u16>,
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_on: DEFAULT_RETRY_ON.to_vec(),
            on_retry: None,
        }
    }
}

impl RetryOptions {
    /// Preset for Anthropic calls: longer timeout, retries the 529
    /// overloaded status.
    pub fn claude() -> Self {
        let mut retry_on = DEFAULT_RETRY_ON.to_vec();
        retry_on.push(ANTHROPIC_OVERLOADED);
        Self {
            timeout: Duration::from_secs(60),
            retry_on,
            ..Self::default()
        }
    }

    /// Preset for image-model calls: generation is slow, so one long
    /// attempt plus a single retry.
    pub fn image_model() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 1,
            ..Self::default()
        }
    }

    fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on.contains(&status)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after {attempts} attempts: {message}")]
    RequestFailed {
        attempts: u32,
        message: String,
        status: Option<u16>,
    },

    /// The request body cannot be cloned for a retry loop (streaming body).
    #[error("request is not retryable: {0}")]
    NotCloneable(String),
}

/// Build a `reqwest::Client` with the standard connect timeout. Per-attempt
/// overall timeouts come from [`RetryOptions`], not the client.
pub fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Exponential backoff with uniform jitter: `base * 2^attempt` plus up to
/// half that again, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = exp.mul_f64(fastrand::f64() * 0.5);
    (exp + jitter).min(MAX_BACKOFF)
}

/// Seconds-form `Retry-After` header, honored verbatim when present.
fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request with per-attempt timeout and exponential-backoff retries.
///
/// Retries on transport errors, timeouts, and the statuses listed in
/// `opts.retry_on`. Non-retryable statuses (e.g. a 404) are returned to the
/// caller untouched. After `max_retries + 1` attempts the last status or
/// error message is surfaced as [`FetchError::RequestFailed`].
pub async fn retryable_fetch(
    request: RequestBuilder,
    opts: &RetryOptions,
) -> Result<Response, FetchError> {
    let mut last_failure: Option<(String, Option<u16>)> = None;

    for attempt in 0..=opts.max_retries {
        let Some(req) = request.try_clone() else {
            return Err(FetchError::NotCloneable(
                "request body is a stream".to_string(),
            ));
        };

        let outcome = tokio::time::timeout(opts.timeout, req.send()).await;
        let (reason, delay_override) = match outcome {
            Ok(Ok(resp)) => {
                let status = resp.status().as_u16();
                if !opts.should_retry_status(status) {
                    return Ok(resp);
                }
                let delay = retry_after(&resp);
                last_failure = Some((format!("status {status}"), Some(status)));
                (format!("status {status}"), delay)
            }
            Ok(Err(e)) => {
                // Builder errors are programmer errors; surface immediately.
                if e.is_builder() {
                    return Err(FetchError::RequestFailed {
                        attempts: attempt + 1,
                        message: e.to_string(),
                        status: None,
                    });
                }
                last_failure = Some((e.to_string(), None));
                (e.to_string(), None)
            }
            Err(_) => {
                let msg = format!("attempt timed out after {:?}", opts.timeout);
                last_failure = Some((msg.clone(), None));
                (msg, None)
            }
        };

        if attempt < opts.max_retries {
            let delay = delay_override.unwrap_or_else(|| backoff_delay(opts.retry_delay, attempt));
            debug!(attempt, ?delay, reason = %reason, "retrying request");
            if let Some(cb) = &opts.on_retry {
                cb(attempt, &reason);
            }
            tokio::time::sleep(delay).await;
        }
    }

    let (message, status) = last_failure.unwrap_or_else(|| ("no attempts made".to_string(), None));
    warn!(attempts = opts.max_retries + 1, %message, "request exhausted retries");
    Err(FetchError::RequestFailed {
        attempts: opts.max_retries + 1,
        message,
        status,
    })
}
