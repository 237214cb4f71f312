//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidManifest { message: String },

    #[error("Failed to decode document {index}: {message}")]
    Decode { index: usize, message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid value: {message}")]
    InvalidValue { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
