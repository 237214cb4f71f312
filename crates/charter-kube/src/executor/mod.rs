//! Cluster executors
//!
//! A [`ClusterExecutor`] is the only component that talks to a cluster.
//! The chart tree hands it object streams; the executor sorts them,
//! stamps them with the owning chart's namespace and labels, and applies
//! or deletes them in kind order.
//!
//! Executors:
//! - **KubeExecutor**: server-side apply against a live cluster
//! - **InMemoryExecutor**: a simulated cluster for tests and dry runs

mod cluster;
mod memory;

pub use cluster::KubeExecutor;
pub use memory::{InMemoryExecutor, Operation, OperationCounts};

use async_trait::async_trait;
use charter_core::{Object, ObjectStream, Settings, genus};
use semver::Version;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::OperationContext;
use crate::error::{KubeError, Result};
use crate::progress::ProgressNode;

/// Equality selector on labels
pub type LabelSelector = BTreeMap<String, String>;

/// Per-call options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Resolve kinds inside a namespace
    pub namespaced: bool,

    /// Namespace to look in instead of the executor's own
    pub namespace: Option<String>,

    /// Timeout for each single cluster call
    pub timeout: Option<Duration>,

    pub context: OperationContext,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            namespaced: true,
            namespace: None,
            timeout: None,
            context: OperationContext::new(),
        }
    }
}

impl ExecOptions {
    pub fn new(context: OperationContext) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Options targeting another namespace
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Options for cluster-scoped lookups
    #[must_use]
    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    /// Context governing a single call
    pub fn call_context(&self) -> OperationContext {
        self.context.child(self.timeout)
    }
}

/// Applies and deletes objects on behalf of one chart
///
/// Implementations must be Send + Sync; scoped executors share the
/// underlying cluster connection with their parent.
#[async_trait]
pub trait ClusterExecutor: Send + Sync {
    /// Namespace objects default to
    fn namespace(&self) -> &str;

    /// Apply objects in ascending kind order
    async fn apply(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()>;

    /// Delete objects in descending kind order; missing objects are skipped
    async fn delete(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()>;

    /// Fetch a single object; fails with `NotFound` when it does not exist
    async fn get(&self, kind: &str, name: &str, opts: &ExecOptions) -> Result<Object>;

    /// List objects of a kind matching every label in `selector`
    async fn list(
        &self,
        kind: &str,
        opts: &ExecOptions,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>>;

    /// Overwrite an existing object
    ///
    /// When the object carries a `resourceVersion` that no longer matches
    /// the stored one, fails with `Conflict`.
    async fn replace(&self, object: Object, opts: &ExecOptions) -> Result<Object>;

    /// Executor for a sub-chart, reporting progress into a new slot of ours
    fn for_sub_chart(
        &self,
        namespace: &str,
        app: &str,
        version: &Version,
        child_count: usize,
    ) -> Arc<dyn ClusterExecutor>;

    /// Report local progress of the chart this executor is scoped to
    fn progress(&self, percent: u8);
}

/// Whether an executor error means the object does not exist
pub fn is_not_exist(err: &KubeError) -> bool {
    err.is_not_found()
}

// ============================================================================
// Scope shared by executor implementations
// ============================================================================

/// Namespace, labels and progress node of one chart
#[derive(Debug, Clone)]
pub(crate) struct ExecScope {
    pub namespace: String,
    pub app: Option<String>,
    pub version: Option<Version>,
    pub settings: Arc<Settings>,
    pub progress: ProgressNode,
}

impl ExecScope {
    pub fn root(settings: Arc<Settings>, namespace: &str, progress: ProgressNode) -> Self {
        Self {
            namespace: namespace.to_string(),
            app: None,
            version: None,
            settings,
            progress,
        }
    }

    pub fn child(&self, namespace: &str, app: &str, version: &Version, child_count: usize) -> Self {
        Self {
            namespace: namespace.to_string(),
            app: Some(app.to_string()),
            version: Some(version.clone()),
            settings: Arc::clone(&self.settings),
            progress: self.progress.scoped(child_count),
        }
    }

    /// Stamp defaults onto every object and sort the stream
    ///
    /// Labels an object already carries are kept.
    pub fn prepare(&self, stream: ObjectStream, reverse: bool) -> ObjectStream {
        let namespace = self.namespace.clone();
        let labels = self.labels();
        stream
            .map(move |obj| {
                obj.set_default_namespace(&namespace);
                for (key, value) in &labels {
                    obj.metadata
                        .labels
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            })
            .sort(reverse)
    }

    /// Labels every object of this chart carries
    pub fn labels(&self) -> Vec<(String, String)> {
        let mut labels = Vec::with_capacity(2);
        if let Some(app) = &self.app {
            labels.push((self.settings.key("app"), genus::strip_label(app)));
        }
        if let Some(version) = &self.version {
            labels.push((
                self.settings.key("version"),
                genus::strip_label(&version.to_string()),
            ));
        }
        labels
    }

    /// Namespace a call for `kind` targets, empty for cluster-scoped lookups
    pub fn target_namespace(&self, kind: &str, opts: &ExecOptions) -> String {
        if opts.namespaced && charter_core::object::is_namespaced_kind(kind) {
            self.call_namespace(opts).to_string()
        } else {
            String::new()
        }
    }

    /// Namespace a call defaults to
    pub fn call_namespace<'a>(&'a self, opts: &'a ExecOptions) -> &'a str {
        opts.namespace.as_deref().unwrap_or(&self.namespace)
    }
}

/// Render a selector the way the API server expects it
pub fn selector_string(selector: &LabelSelector) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether an object carries every label in the selector
pub fn matches_selector(object: &Object, selector: &LabelSelector) -> bool {
    selector
        .iter()
        .all(|(k, v)| object.metadata.labels.get(k) == Some(v))
}
