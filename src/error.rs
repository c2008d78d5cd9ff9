use thiserror::Error;

/// Main error type for the pressure engine.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Order book out of sync: {0}")]
    OutOfSync(String),

    #[error("Stream terminated: {0}")]
    StreamClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// Transient errors are recovered by reconnect/resnapshot; everything
    /// else surfaces to the caller of `start()`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Connection(_) | FeedError::RateLimit(_) | FeedError::OutOfSync(_)
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            FeedError::Config(_) => "config_error",
            FeedError::Connection(_) => "connection_error",
            FeedError::RateLimit(_) => "rate_limit",
            FeedError::Parse(_) => "parse_error",
            FeedError::OutOfSync(_) => "out_of_sync",
            FeedError::StreamClosed(_) => "stream_closed",
            FeedError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Connection("Request timeout talking to Binance futures API".to_string())
        } else if err.is_connect() {
            FeedError::Connection("Failed to connect to Binance futures API".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => FeedError::RateLimit(
                    "Too many requests to Binance futures API. Retry after 60 seconds.".to_string(),
                ),
                418 => FeedError::Connection("IP address banned by Binance".to_string()),
                403 => {
                    FeedError::Connection("WAF limit violated, reduce request frequency".to_string())
                }
                500..=599 => FeedError::Connection(format!(
                    "Binance server error (HTTP {})",
                    status.as_u16()
                )),
                _ => FeedError::Internal(format!("HTTP error: {}", status)),
            }
        } else {
            FeedError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(format!("JSON parsing failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FeedError::Connection("ws closed".into()).is_retryable());
        assert!(FeedError::OutOfSync("gap".into()).is_retryable());
        assert!(!FeedError::Config("missing symbol".into()).is_retryable());
        assert!(!FeedError::Parse("bad json".into()).is_retryable());
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(FeedError::Config("x".into()).error_type(), "config_error");
        assert_eq!(FeedError::OutOfSync("x".into()).error_type(), "out_of_sync");
    }
}
