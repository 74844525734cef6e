use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy shared by every reportdb crate.
///
/// "Empty corpus" and "no candidates" are deliberately absent: both are
/// reported as an [`EmptyReason`](crate::types::EmptyReason) on an empty
/// [`RetrievalResult`](crate::types::RetrievalResult).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Embedding provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Errors worth another attempt against the embedding provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_) | Error::RateLimited { .. })
    }

    /// Hint from the provider for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::ProviderUnavailable("timeout".into()).is_transient());
        assert!(Error::RateLimited { retry_after: None }.is_transient());
        assert!(!Error::IndexCorrupt("checksum".into()).is_transient());
        assert!(!Error::DimensionMismatch { expected: 3, actual: 4 }.is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let e = Error::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(e.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(Error::ProviderUnavailable("x".into()).retry_after(), None);
    }
}
