//! Error types for chart sources

use charter_kube::KubeError;
use thiserror::Error;

/// Chart source errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepoError {
    // ============ Network Errors ============
    #[error("HTTP error fetching {url}: {message}")]
    Http { url: String, message: String },

    #[error("Error fetching {url}: status={status}")]
    HttpStatus { url: String, status: u16 },

    // ============ Cache Errors ============
    #[error("No content written for {name}")]
    CacheWriteIncomplete { name: String },

    // ============ Source Errors ============
    #[error("Chart not found for url {url}: {reason}")]
    NotFound { url: String, reason: String },

    #[error(transparent)]
    Core(#[from] charter_core::CoreError),

    #[error(transparent)]
    Kube(#[from] KubeError),

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for chart source operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    pub(crate) fn http(url: &str, err: reqwest::Error) -> Self {
        RepoError::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<RepoError> for KubeError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Kube(inner) => inner,
            other => KubeError::Source(other.to_string()),
        }
    }
}
