//! Shared dependencies
//!
//! A dependency names a chart by URL and version constraint. Charts of the
//! same genus in the same namespace are installed once and shared; the
//! packaged record of the shared chart tracks who uses it.

use async_trait::async_trait;
use charter_core::{DependencySpec, GenusAndVersion, Values};
use semver::{Version, VersionReq};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::chart::{Chart, ChartContext, ChartOptions};
use crate::error::{KubeError, Result};
use crate::executor::{ClusterExecutor, ExecOptions};
use crate::packaged::PackagedChart;

/// Loads charts by URL or from their packaged records
#[async_trait]
pub trait ChartRepository: Send + Sync {
    /// Load the chart a URL points to
    async fn load(&self, url: &str, options: ChartOptions, context: &ChartContext)
    -> Result<Chart>;

    /// Load the chart an installed record was packaged from
    async fn load_packaged(
        &self,
        record: &PackagedChart,
        options: ChartOptions,
        context: &ChartContext,
    ) -> Result<Chart>;
}

/// A possibly shared chart another chart depends on
pub struct Dependency {
    name: String,
    url: String,
    constraint: VersionReq,
    namespace: String,
    owner: String,
    pending: Values,
    resolved: Option<Box<Chart>>,
    context: ChartContext,
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("constraint", &self.constraint.to_string())
            .field("namespace", &self.namespace)
            .field("resolved", &self.resolved.is_some())
            .finish()
    }
}

impl Dependency {
    pub fn new(
        spec: &DependencySpec,
        namespace: String,
        owner: String,
        pending: Values,
        context: ChartContext,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            url: spec.url.clone(),
            constraint: spec.constraint.clone(),
            namespace,
            owner,
            pending,
            resolved: None,
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Identity registered in the shared chart's user set
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The chart this dependency resolved to, once applied
    pub fn resolved(&self) -> Option<&Chart> {
        self.resolved.as_deref()
    }

    fn genus(&self) -> Result<GenusAndVersion> {
        let gv = GenusAndVersion::from_url(&self.url);
        if gv.is_empty() {
            return Err(KubeError::Source(format!(
                "cannot derive a genus from dependency url '{}'",
                self.url
            )));
        }
        Ok(gv)
    }

    // ========================================================================
    // Property facade
    // ========================================================================

    /// Set a value; before resolution it is kept until the chart is known
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        match self.resolved.as_mut() {
            Some(chart) => chart.set(path, value),
            None => Ok(self.pending.set(path, value)?),
        }
    }

    pub fn get(&self, path: &str) -> Option<JsonValue> {
        match &self.resolved {
            Some(chart) => Values(chart.values()).get(path).cloned(),
            None => self.pending.get(path).cloned(),
        }
    }

    /// Merge values, overrides win
    pub fn merge(&mut self, overlay: &Values) {
        match self.resolved.as_mut() {
            Some(chart) => chart.merge_values(overlay),
            None => self.pending.merge(overlay),
        }
    }

    /// Values of the resolved chart, or the pending ones
    pub fn values(&self) -> JsonValue {
        match &self.resolved {
            Some(chart) => chart.values(),
            None => self.pending.inner().clone(),
        }
    }

    // ========================================================================
    // Apply / delete
    // ========================================================================

    /// Bind to the installed chart of this genus, installing it when
    /// there is none
    pub async fn apply(&mut self, executor: &dyn ClusterExecutor, opts: &ExecOptions) -> Result<()> {
        if self.resolved.is_some() {
            return Ok(());
        }
        let gv = self.genus()?;
        let settings = &self.context.settings;
        let lookup = opts.clone().in_namespace(&self.namespace);
        let mut records = PackagedChart::list(executor, settings, &gv.genus, &lookup).await?;

        if records.len() > 1 {
            return Err(KubeError::AmbiguousDependency {
                genus: gv.genus,
                namespace: self.namespace.clone(),
                count: records.len(),
            });
        }

        if let Some(record) = records.pop() {
            self.check_constraint(&gv.genus, &record.version)?;
            record.add_user(executor, settings, &self.owner, opts).await?;

            let mut values = Values(record.values.clone());
            values.merge(&self.pending);
            let options = ChartOptions {
                namespace: Some(self.namespace.clone()),
                values,
                genus: Some(gv.genus.clone()),
                version: Some(record.version.clone()),
                ..Default::default()
            }
            .read_only();
            let mut chart = self
                .context
                .repository
                .load_packaged(&record, options, &self.context)
                .await?;
            chart.apply(executor, opts).await?;

            tracing::info!(
                dependency = %self.name,
                genus = %gv.genus,
                version = %record.version,
                "using installed chart"
            );
            self.resolved = Some(Box::new(chart));
            return Ok(());
        }

        let options = ChartOptions {
            namespace: Some(self.namespace.clone()),
            values: self.pending.clone(),
            ..Default::default()
        }
        .with_genus_and_version(gv.clone());
        let mut chart = self
            .context
            .repository
            .load(&self.url, options, &self.context)
            .await?;
        self.check_constraint(&gv.genus, chart.version())?;

        chart.apply(executor, opts).await?;
        chart
            .record(Default::default())?
            .add_user(executor, settings, &self.owner, opts)
            .await?;

        tracing::info!(
            dependency = %self.name,
            genus = %gv.genus,
            version = %chart.version(),
            "installed shared chart"
        );
        self.resolved = Some(Box::new(chart));
        Ok(())
    }

    /// Drop our registration; with `recursive` the shared chart is deleted
    /// once nobody uses it
    pub async fn delete(
        &mut self,
        executor: &dyn ClusterExecutor,
        opts: &ExecOptions,
        recursive: bool,
    ) -> Result<()> {
        let gv = self.genus()?;
        let settings = Arc::clone(&self.context.settings);
        let lookup = opts.clone().in_namespace(&self.namespace);
        let mut records = PackagedChart::list(executor, &settings, &gv.genus, &lookup).await?;

        if records.len() > 1 {
            return Err(KubeError::AmbiguousDependency {
                genus: gv.genus,
                namespace: self.namespace.clone(),
                count: records.len(),
            });
        }
        let Some(record) = records.pop() else {
            tracing::debug!(dependency = %self.name, "no installed chart");
            self.skip_progress(executor);
            return Ok(());
        };
        self.bind_installed_values(&record);

        let remaining = record
            .remove_user(executor, &settings, &self.owner, opts)
            .await?;
        if !recursive || remaining > 0 {
            tracing::info!(dependency = %self.name, users = remaining, "keeping shared chart");
            self.skip_progress(executor);
            return Ok(());
        }

        let options = ChartOptions {
            namespace: Some(self.namespace.clone()),
            values: Values(record.values.clone()),
            genus: Some(gv.genus.clone()),
            version: Some(record.version.clone()),
            ..Default::default()
        };
        let mut chart = self
            .context
            .repository
            .load_packaged(&record, options, &self.context)
            .await?;
        chart.delete(executor, opts, recursive).await?;
        tracing::info!(dependency = %self.name, genus = %gv.genus, "deleted unused shared chart");
        Ok(())
    }

    /// Values of the installed chart under our pending ones, so the owner
    /// renders on delete the way it did on apply
    fn bind_installed_values(&mut self, record: &PackagedChart) {
        if self.resolved.is_some() {
            return;
        }
        let mut values = Values(record.values.clone());
        values.merge(&self.pending);
        self.pending = values;
    }

    fn check_constraint(&self, genus: &str, version: &Version) -> Result<()> {
        if self.constraint.matches(version) {
            Ok(())
        } else {
            Err(KubeError::VersionConstraintViolation {
                genus: genus.to_string(),
                version: version.to_string(),
                constraint: self.constraint.to_string(),
            })
        }
    }

    /// Fill the progress slot reserved for this dependency when no chart
    /// operation runs for it
    pub(crate) fn skip_progress(&self, executor: &dyn ClusterExecutor) {
        let version = self
            .resolved
            .as_ref()
            .map(|chart| chart.version().clone())
            .unwrap_or_else(|| Version::new(0, 0, 0));
        executor
            .for_sub_chart(&self.namespace, &self.name, &version, 0)
            .progress(100);
    }
}
