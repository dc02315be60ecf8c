//! Error types for clarify-core.

use thiserror::Error;

/// Result type alias using clarify-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a clarification session.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend did not answer in time
    #[error("Backend timed out: {provider} after {duration_ms}ms")]
    BackendTimeout { provider: String, duration_ms: u64 },

    /// Backend refused the request because of rate limiting
    #[error("Backend rate limited: {provider} - {message}")]
    RateLimited { provider: String, message: String },

    /// Backend could not be reached or returned a server error
    #[error("Backend unavailable: {provider} - {message}")]
    BackendUnavailable { provider: String, message: String },

    /// Backend rejected the request (client error or malformed response)
    #[error("Backend rejected request: {provider} - {message}")]
    BackendRejected { provider: String, message: String },

    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Snapshot storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend timeout error.
    pub fn backend_timeout(provider: impl Into<String>, duration_ms: u64) -> Self {
        Self::BackendTimeout {
            provider: provider.into(),
            duration_ms,
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a backend rejection error.
    pub fn backend_rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendRejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether a retry (or a fallback tier) can reasonably succeed.
    ///
    /// Validation problems and explicit rejections never get better by
    /// trying again; everything transport- or storage-related might.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. }
                | Self::RateLimited { .. }
                | Self::BackendUnavailable { .. }
                | Self::Storage(_)
        )
    }

    /// Whether the error originated from a reasoning backend.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. }
                | Self::RateLimited { .. }
                | Self::BackendUnavailable { .. }
                | Self::BackendRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::backend_timeout("anthropic", 5000).is_retryable());
        assert!(Error::rate_limited("openai", "slow down").is_retryable());
        assert!(Error::backend_unavailable("openai", "502").is_retryable());
        assert!(Error::Storage("disk full".to_string()).is_retryable());

        assert!(!Error::validation("empty input").is_retryable());
        assert!(!Error::backend_rejected("anthropic", "400").is_retryable());
        assert!(!Error::NotFound("agent".to_string()).is_retryable());
        assert!(!Error::Cache("poisoned".to_string()).is_retryable());
    }

    #[test]
    fn test_backend_classification() {
        assert!(Error::backend_rejected("anthropic", "bad json").is_backend());
        assert!(!Error::Storage("locked".to_string()).is_backend());
    }

    #[test]
    fn test_display() {
        let err = Error::backend_timeout("anthropic", 5000);
        assert_eq!(err.to_string(), "Backend timed out: anthropic after 5000ms");
    }
}
