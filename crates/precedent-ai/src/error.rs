use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Server {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl AiError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: u16) -> AiError {
        AiError::Server {
            provider: "OpenAI-gpt-4o".into(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn rate_limit_and_5xx_are_transient() {
        assert!(server(429).is_transient());
        assert!(server(500).is_transient());
        assert!(server(503).is_transient());
        assert!(AiError::Timeout("x".into()).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!server(400).is_transient());
        assert!(!server(401).is_transient());
        assert!(!AiError::EmptyResponse("x".into()).is_transient());
        assert!(
            !AiError::DimensionMismatch {
                expected: 1536,
                actual: 384
            }
            .is_transient()
        );
    }
}
