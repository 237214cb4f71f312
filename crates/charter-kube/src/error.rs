//! Error types for charter-kube

use thiserror::Error;

/// Result type for charter-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Phase of a chart operation, recorded as errors bubble up the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Apply,
    Delete,
    Template,
    Vaults,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Apply => "apply",
            Phase::Delete => "delete",
            Phase::Template => "template",
            Phase::Vaults => "vaults",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while deploying a chart tree
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Object does not exist in the cluster
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// More than one installed chart of the same genus
    #[error("found {count} charts of genus '{genus}' in namespace '{namespace}', expected at most one")]
    AmbiguousDependency {
        genus: String,
        namespace: String,
        count: usize,
    },

    /// Installed shared chart does not satisfy the requested constraint
    #[error("chart '{genus}' is installed in version {version}, which does not satisfy '{constraint}'")]
    VersionConstraintViolation {
        genus: String,
        version: String,
        constraint: String,
    },

    /// Vault backend failure
    #[error("vault '{vault}': {message}")]
    Backend { vault: String, message: String },

    /// Cluster executor failure with the action it was performing
    #[error("{context}: {message}")]
    Executor { context: String, message: String },

    /// Object changed since it was read
    #[error("{kind} '{name}' was modified concurrently")]
    Conflict { kind: String, name: String },

    /// The operation context was cancelled or ran past its deadline
    #[error("operation cancelled")]
    Cancelled,

    /// Error inside a chart, with the phase it happened in
    #[error("chart '{chart}' ({phase}): {source}")]
    Chart {
        chart: String,
        phase: Phase,
        #[source]
        source: Box<KubeError>,
    },

    /// Chart source or manifest problem
    #[error("chart error: {0}")]
    Source(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for KubeError {
    fn from(e: base64::DecodeError) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<charter_core::CoreError> for KubeError {
    fn from(e: charter_core::CoreError) -> Self {
        KubeError::Source(e.to_string())
    }
}

impl From<charter_engine::EngineError> for KubeError {
    fn from(e: charter_engine::EngineError) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl KubeError {
    pub fn executor(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KubeError::Executor {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn backend(vault: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KubeError::Backend {
            vault: vault.into(),
            message: message.to_string(),
        }
    }

    /// Attach chart and phase context
    pub fn in_chart(self, chart: impl Into<String>, phase: Phase) -> Self {
        KubeError::Chart {
            chart: chart.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// Innermost error below any chart context
    pub fn root_cause(&self) -> &KubeError {
        match self {
            KubeError::Chart { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Path of chart names from the outermost to the failing chart
    pub fn chart_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let KubeError::Chart { chart, source, .. } = current {
            path.push(chart.as_str());
            current = source;
        }
        path
    }

    /// Whether the object simply does not exist
    pub fn is_not_found(&self) -> bool {
        match self.root_cause() {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self.root_cause() {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), KubeError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain() {
        let err = KubeError::NotFound {
            kind: "Secret".into(),
            name: "s".into(),
        }
        .in_chart("db", Phase::Apply)
        .in_chart("shop", Phase::Apply);

        assert!(err.is_not_found());
        assert_eq!(err.chart_path(), vec!["shop", "db"]);
        assert!(err.to_string().starts_with("chart 'shop' (apply): chart 'db' (apply)"));
        assert!(matches!(err.root_cause(), KubeError::NotFound { .. }));
    }

    #[test]
    fn test_classifiers() {
        assert!(KubeError::Cancelled.is_cancelled());
        assert!(
            KubeError::Conflict {
                kind: "Secret".into(),
                name: "x".into()
            }
            .is_conflict()
        );
        assert!(!KubeError::backend("v", "boom").is_not_found());
    }
}
