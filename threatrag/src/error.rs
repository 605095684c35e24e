use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Embedding service error: {message}")]
    EmbeddingService { message: String, retryable: bool },

    #[error("Embedding rate limit exceeded, retry after {retry_after:?} seconds")]
    EmbeddingRateLimit { retry_after: Option<u64> },

    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] Box<RagError>),

    /// A backend failure that may clear on its own. Shape and ownership
    /// mismatches are `Config` and `Validation` instead.
    #[error("Index error: {0}")]
    Index(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM error: {message}")]
    Llm { message: String, retryable: bool },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingService {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn embedding_retryable(message: impl Into<String>) -> Self {
        Self::EmbeddingService {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn llm_retryable(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn retrieval(cause: RagError) -> Self {
        match cause {
            already @ RagError::Retrieval(_) => already,
            other => RagError::Retrieval(Box::new(other)),
        }
    }

    /// Whether a failed upstream call may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingService { retryable, .. } | Self::Llm { retryable, .. } => *retryable,
            Self::EmbeddingRateLimit { .. } | Self::LlmRateLimit { .. } => true,
            Self::Timeout(_) | Self::Index(_) => true,
            Self::Http(e) => e
                .status()
                .map(|status| status.is_server_error())
                .unwrap_or(true),
            Self::Retrieval(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RagError::embedding_retryable("503").is_retryable());
        assert!(!RagError::embedding("401").is_retryable());
        assert!(RagError::EmbeddingRateLimit { retry_after: None }.is_retryable());
        assert!(RagError::Timeout("index query".to_string()).is_retryable());
        assert!(!RagError::InvalidDocument("empty".to_string()).is_retryable());
        assert!(!RagError::Cancelled.is_retryable());
        assert!(RagError::llm_retryable("502").is_retryable());
        assert!(!RagError::llm("no choices").is_retryable());
        assert!(!RagError::LlmUnavailable("401".to_string()).is_retryable());
        assert!(RagError::Index("connection reset".to_string()).is_retryable());
        assert!(!RagError::Config("dimension mismatch".to_string()).is_retryable());
        assert!(!RagError::Validation("foreign chunk".to_string()).is_retryable());
    }

    #[test]
    fn test_retrieval_does_not_double_wrap() {
        let err = RagError::retrieval(RagError::retrieval(RagError::Index("gone".to_string())));
        match err {
            RagError::Retrieval(inner) => assert!(matches!(*inner, RagError::Index(_))),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
