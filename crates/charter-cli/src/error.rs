//! CLI error types with exit code handling
//!
//! Library errors are folded into a few user-facing categories, each with
//! its own exit code.

use charter_core::CoreError;
use charter_kube::{KubeError, Phase};
use charter_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid chart, values or arguments
    #[error("Chart error: {message}")]
    #[diagnostic(code(charter::cli::chart))]
    Chart {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template rendering failed
    #[error("Template error: {message}")]
    #[diagnostic(code(charter::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The cluster or a vault backend refused an operation
    #[error("Deployment failed: {message}")]
    #[diagnostic(code(charter::cli::deploy))]
    Deploy {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Shared chart cannot be used
    #[error("Dependency error: {message}")]
    #[diagnostic(code(charter::cli::dependency))]
    Dependency {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A chart source could not be fetched
    #[error("Source error: {message}")]
    #[diagnostic(
        code(charter::cli::source),
        help("check the URL and the credentials in repositories.yaml")
    )]
    Source { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(charter::cli::io))]
    Io { message: String },

    /// Interrupted before completion
    #[error("Operation cancelled")]
    #[diagnostic(
        code(charter::cli::cancelled),
        help("objects applied so far are left in place; run the command again to finish")
    )]
    Cancelled,

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(charter::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Chart { .. } => exit_codes::CHART_ERROR,
            CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Deploy { .. } => exit_codes::DEPLOY_ERROR,
            CliError::Dependency { .. } => exit_codes::DEPENDENCY_ERROR,
            CliError::Source { .. } => exit_codes::SOURCE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Cancelled => exit_codes::CANCELLED,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a chart error
    pub fn chart(message: impl Into<String>) -> Self {
        Self::Chart {
            message: message.into(),
            help: None,
        }
    }
}

/// "in chart shop/db during apply" for errors raised inside a tree
fn location(err: &KubeError) -> Option<String> {
    let path = err.chart_path();
    if path.is_empty() {
        return None;
    }
    let mut phase = Phase::Apply;
    let mut current = err;
    while let KubeError::Chart {
        phase: p, source, ..
    } = current
    {
        phase = *p;
        current = source;
    }
    Some(format!("in chart {} during {phase}", path.join("/")))
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let help = location(&err);
        let cause = err.root_cause();
        let message = cause.to_string();
        match cause {
            KubeError::Cancelled => CliError::Cancelled,
            KubeError::AmbiguousDependency { .. } => CliError::Dependency {
                message,
                help: help.or_else(|| Some("delete the extra installations first".into())),
            },
            KubeError::VersionConstraintViolation { .. } => CliError::Dependency { message, help },
            KubeError::Template(detail) => CliError::Template {
                message: detail.clone(),
                help,
            },
            KubeError::Source(detail) => CliError::Chart {
                message: detail.clone(),
                help,
            },
            KubeError::Io(_) => CliError::Io { message },
            KubeError::NotFound { .. }
            | KubeError::Conflict { .. }
            | KubeError::Backend { .. }
            | KubeError::Executor { .. }
            | KubeError::Api(_) => CliError::Deploy { message, help },
            _ => CliError::Other { message },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Kube(inner) => inner.into(),
            RepoError::Core(inner) => inner.into(),
            RepoError::Io(inner) => inner.into(),
            other => CliError::Source {
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(inner) => inner.into(),
            other => CliError::chart(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
