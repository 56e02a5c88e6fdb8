use thiserror::Error;

/// Typed error hierarchy for pagesmith.
///
/// Use at module boundaries (provider calls, persistence, the gateway).
/// Internal/leaf functions can continue using `anyhow::Result` — the `Internal`
/// variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum PagesmithError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Model output parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using PagesmithError.
pub type PagesmithResult<T> = std::result::Result<T, PagesmithError>;

impl PagesmithError {
    /// Whether this error is retryable (rate limits, transient upstream errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            PagesmithError::RateLimit { .. } => true,
            PagesmithError::Upstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short error-class name used as the `byType` key in error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PagesmithError::Input(_) => "input",
            PagesmithError::Config(_) => "config",
            PagesmithError::Auth(_) => "auth",
            PagesmithError::Upstream { .. } => "upstream",
            PagesmithError::RateLimit { .. } => "rate-limit",
            PagesmithError::Parse(_) => "parse",
            PagesmithError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_display() {
        let err = PagesmithError::Input("missing query".into());
        assert_eq!(err.to_string(), "Invalid input: missing query");
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_error_retryable() {
        let err = PagesmithError::Upstream {
            message: "503 from provider".into(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "upstream");
    }

    #[test]
    fn rate_limit_retryable() {
        let err = PagesmithError::RateLimit {
            retry_after: Some(30),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_error_not_retryable() {
        let err = PagesmithError::Auth("expired token".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn internal_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("something broke");
        let err: PagesmithError = anyhow_err.into();
        assert!(matches!(err, PagesmithError::Internal(_)));
        assert!(!err.is_retryable());
    }
}
