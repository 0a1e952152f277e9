use std::time::Duration;

use thiserror::Error;
use tootles_model::{ModelError, ResourceKey};

use crate::units::ByteSize;

/// Failure of a single remote fetch.
///
/// Cloneable because every waiter on a deduplicated fetch receives the same
/// outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("HTTP client error: {status}")]
    HttpClientError { status: u16 },

    #[error("HTTP server error: {status}")]
    HttpServerError { status: u16 },

    #[error("response exceeds the {limit} cap")]
    OversizeResponse { limit: ByteSize },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transient errors are retried with backoff; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_)
                | FetchError::NetworkFailure(_)
                | FetchError::HttpServerError { .. }
        )
    }

    /// Map an HTTP status that is not a success.
    pub fn from_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            FetchError::HttpServerError { status }
        } else {
            FetchError::HttpClientError { status }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::from_status(status.as_u16());
        }
        FetchError::NetworkFailure(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache write failed for {key}: {reason}")]
    WriteFailure { key: ResourceKey, reason: String },

    #[error("cache entry {key} is corrupt: {reason}")]
    ReadCorruption { key: ResourceKey, reason: String },

    #[error("{size} entry exceeds the {budget} tier budget")]
    BudgetExceeded { size: ByteSize, budget: ByteSize },

    /// The key was invalidated after this write was started.
    #[error("write for {key} dropped: invalidated while in flight")]
    Superseded { key: ResourceKey },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("decode failed: {0}")]
    DecodeFailure(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
}

impl RenderError {
    /// Only corrupt payloads end a request as `Failed`; decode failures
    /// defer with a retry hint.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::CorruptPayload(_))
    }
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::{FetchError, RenderError};
    use std::time::Duration;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(FetchError::NetworkFailure("reset".into()).is_transient());
        assert!(FetchError::from_status(503).is_transient());
        assert!(!FetchError::from_status(404).is_transient());
        assert!(!FetchError::UnsupportedScheme("ftp".into()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
    }

    #[test]
    fn only_corrupt_payload_is_fatal() {
        assert!(RenderError::CorruptPayload("empty".into()).is_fatal());
        assert!(!RenderError::UnsupportedFormat("svg".into()).is_fatal());
        assert!(!RenderError::DecodeFailure("eof".into()).is_fatal());
    }
}
