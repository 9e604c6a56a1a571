use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Completion timed out after {0}s")]
    Timeout(u64),

    #[error("Provider returned an empty completion")]
    EmptyResponse,
}

impl AiError {
    /// Transient transport and provider failures. Reported alongside
    /// failures; callers decide their own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::Network(_) | AiError::Api { .. } | AiError::Timeout(_) | AiError::EmptyResponse
        )
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

pub type AiResult<T> = Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retryable() {
        assert!(AiError::Network("reset".into()).is_retryable());
        assert!(AiError::Timeout(30).is_retryable());
        assert!(AiError::EmptyResponse.is_retryable());
        assert!(AiError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
    }

    #[test]
    fn config_and_parse_failures_are_not_retryable() {
        assert!(!AiError::Config("missing key".into()).is_retryable());
        assert!(!AiError::Parse("bad json".into()).is_retryable());
    }
}
