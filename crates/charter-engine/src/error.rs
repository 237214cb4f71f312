//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Template {template}: {message}")]
    Template {
        template: String,
        message: String,
        line: Option<usize>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] charter_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Wrap a MiniJinja error with the template it came from
    pub fn from_minijinja(err: minijinja::Error, template: &str) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Template {
            template: template.to_string(),
            message,
            line: err.line(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
