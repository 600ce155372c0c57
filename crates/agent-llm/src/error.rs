use agent_retry::RetryableError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// Fold a transport error into the retry taxonomy.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LlmError::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            LlmError::Network(error.to_string())
        } else {
            LlmError::Api(error.to_string())
        }
    }
}

impl RetryableError for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout(_) | LlmError::Stream(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(LlmError::Network("down".into()).is_retryable());
        assert!(LlmError::Timeout("slow".into()).is_retryable());
        assert!(LlmError::Stream("cut".into()).is_retryable());
        assert!(!LlmError::Api("401".into()).is_retryable());
    }
}
