//! Command implementations

pub mod apply;
pub mod delete;
pub mod list;
pub mod package;
pub mod template;

use charter_core::{Settings, parse_set_values};
use charter_engine::TemplateRenderer;
use charter_kube::{
    Chart, ChartContext, ChartOptions, ClusterExecutor, InMemoryExecutor,
    KubeExecutor, OperationContext, ProgressNode,
};
use charter_repo::{Repository, RepositoryConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::prompt::TerminalPrompter;

/// Settings and collaborators shared by one command invocation
pub struct Session {
    pub settings: Arc<Settings>,
    pub context: ChartContext,
}

impl Session {
    /// Load settings from `config` or the default location
    pub fn open(config: Option<&Path>) -> Result<Self> {
        let settings = match config {
            Some(path) => Settings::load(path)?,
            None => Settings::discover()?,
        };
        let settings = Arc::new(settings);
        let repository = Repository::new(&settings, RepositoryConfig::discover()?)?;
        tracing::debug!(cache = %settings.cache_dir.display(), "session opened");

        let context = ChartContext {
            settings: Arc::clone(&settings),
            renderer: Arc::new(TemplateRenderer::default()),
            prompter: Arc::new(TerminalPrompter::new()),
            repository: Arc::new(repository),
        };
        Ok(Self { settings, context })
    }

    /// Load the chart tree `chart` points to, with `--set` overrides applied
    pub async fn load_chart(
        &self,
        chart: &str,
        namespace: Option<&str>,
        set: &[String],
        options: ChartOptions,
    ) -> Result<Chart> {
        let overrides = parse_set_values(set)?;
        let options = match namespace {
            Some(ns) => options.with_namespace(ns),
            None => options,
        };
        let mut loaded = self
            .context
            .repository
            .load(chart, options, &self.context)
            .await?;
        loaded.merge_values(&overrides);
        Ok(loaded)
    }
}

/// Where objects go
pub enum Target {
    Memory(InMemoryExecutor),
    Cluster(KubeExecutor),
}

impl Target {
    pub async fn connect(
        settings: Arc<Settings>,
        namespace: &str,
        progress: ProgressNode,
        in_memory: bool,
    ) -> Result<Self> {
        if in_memory {
            return Ok(Target::Memory(InMemoryExecutor::with_progress(
                settings, namespace, progress,
            )));
        }
        let executor = KubeExecutor::connect(settings, namespace, progress).await?;
        Ok(Target::Cluster(executor))
    }

    pub fn executor(&self) -> &dyn ClusterExecutor {
        match self {
            Target::Memory(executor) => executor,
            Target::Cluster(executor) => executor,
        }
    }

    pub fn in_memory(&self) -> Option<&InMemoryExecutor> {
        match self {
            Target::Memory(executor) => Some(executor),
            Target::Cluster(_) => None,
        }
    }
}

/// Operation context cancelled by Ctrl-C
pub fn interruptible(timeout: Option<Duration>) -> OperationContext {
    let context = match timeout {
        Some(timeout) => OperationContext::with_timeout(timeout),
        None => OperationContext::new(),
    };
    let watcher = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            watcher.cancel();
        }
    });
    context
}
