//! Chart trees
//!
//! A [`Chart`] is a loaded chart source plus its properties: plain values,
//! nested sub-charts, vaults and dependencies, kept in declaration order.
//!
//! ## Apply
//!
//! 1. Scope the executor to the chart (namespace, labels, progress slot)
//! 2. Apply sub-charts and dependencies in declaration order
//! 3. Read vaults from the cluster
//! 4. Unless read-only: materialize vaults, render templates, add vault
//!    secrets and the packaged record, apply the sorted stream
//! 5. Report 100%
//!
//! Delete walks the same tree; the executor reverses the kind order.

use charter_core::{
    GenusAndVersion, LoadedChart, Object, ObjectStream, Settings, Values, archive,
};
use charter_engine::{ChartInfo, RenderContext, Renderer};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use semver::Version;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::dependency::{ChartRepository, Dependency};
use crate::error::{KubeError, Phase, Result};
use crate::executor::{ClusterExecutor, ExecOptions};
use crate::packaged::PackagedChart;
use crate::vault::{Prompter, Vault};

/// Collaborators every chart of a tree shares
#[derive(Clone)]
pub struct ChartContext {
    pub settings: Arc<Settings>,
    pub renderer: Arc<dyn Renderer>,
    pub prompter: Arc<dyn Prompter>,
    pub repository: Arc<dyn ChartRepository>,
}

/// How a chart is instantiated
#[derive(Debug, Clone, Default)]
pub struct ChartOptions {
    /// Target namespace; falls back to Chart.yaml, then the settings default
    pub namespace: Option<String>,

    /// Never mutate the cluster for this chart
    pub read_only: bool,

    /// Do not emit the packaged-chart record
    pub skip_packaging: bool,

    /// Overrides merged over values.yaml
    pub values: Values,

    /// Genus when the source URL determined one
    pub genus: Option<String>,

    /// Version when the source URL determined one
    pub version: Option<Version>,
}

impl ChartOptions {
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn skip_packaging(mut self) -> Self {
        self.skip_packaging = true;
        self
    }

    /// Take genus and version from a source URL
    #[must_use]
    pub fn with_genus_and_version(mut self, gv: GenusAndVersion) -> Self {
        if !gv.is_empty() {
            self.genus = Some(gv.genus);
        }
        if gv.version.is_some() {
            self.version = gv.version;
        }
        self
    }
}

/// One property of a chart
pub enum Property {
    Value(JsonValue),
    Chart(Box<Chart>),
    Vault(Vault),
    Dependency(Box<Dependency>),
}

/// A chart and its properties
pub struct Chart {
    name: String,
    version: Version,
    namespace: String,
    genus: String,
    read_only: bool,
    skip_packaging: bool,
    source: LoadedChart,
    properties: IndexMap<String, Property>,
    context: ChartContext,
}

impl fmt::Debug for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chart")
            .field("name", &self.name)
            .field("version", &self.version.to_string())
            .field("namespace", &self.namespace)
            .field("genus", &self.genus)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Chart {
    /// Instantiate a loaded chart source, loading sub-charts recursively
    pub fn load<'a>(
        source: LoadedChart,
        options: ChartOptions,
        context: &'a ChartContext,
    ) -> BoxFuture<'a, Result<Chart>> {
        Box::pin(async move {
            let manifest = &source.manifest;
            let name = manifest.name.clone();
            let namespace = options
                .namespace
                .clone()
                .or_else(|| manifest.namespace.clone())
                .unwrap_or_else(|| context.settings.default_namespace.clone());
            let version = options
                .version
                .clone()
                .unwrap_or_else(|| manifest.version.clone());
            let genus = options.genus.clone().unwrap_or_else(|| name.clone());

            let mut values = source.values.clone();
            values.merge(&options.values);

            let mut properties = IndexMap::new();
            for spec in &manifest.charts {
                let mut sub_values = spec.values.clone();
                sub_values.merge(&values.scope_for_subchart(&spec.name));
                let mut sub_options = ChartOptions {
                    namespace: Some(spec.namespace.clone().unwrap_or_else(|| namespace.clone())),
                    read_only: options.read_only,
                    values: sub_values,
                    ..Default::default()
                };

                let chart = match (source.subchart_dir(spec), &spec.url) {
                    (Some(dir), _) => {
                        let loaded = LoadedChart::load(&dir)
                            .map_err(|e| KubeError::from(e).in_chart(&name, Phase::Template))?;
                        Chart::load(loaded, sub_options, context).await?
                    }
                    (None, Some(url)) => {
                        sub_options = sub_options.with_genus_and_version(GenusAndVersion::from_url(url));
                        context.repository.load(url, sub_options, context).await?
                    }
                    (None, None) => {
                        return Err(KubeError::Source(format!(
                            "sub-chart '{}' has no source",
                            spec.name
                        )));
                    }
                };
                properties.insert(spec.name.clone(), Property::Chart(Box::new(chart)));
            }

            let mut vaults: IndexMap<String, Vault> = IndexMap::new();
            for spec in &manifest.vaults {
                let vault = Vault::from_spec(spec, &vaults, Arc::clone(&context.prompter))?;
                vaults.insert(spec.name.clone(), vault.clone());
                properties.insert(spec.name.clone(), Property::Vault(vault));
            }

            let owner = owner_id(&namespace, &genus);
            for spec in &manifest.dependencies {
                let mut pending = spec.values.clone();
                if let Some(overrides) = values.get(&spec.name) {
                    pending.merge(&Values(overrides.clone()));
                }
                let dependency = Dependency::new(
                    spec,
                    spec.namespace.clone().unwrap_or_else(|| namespace.clone()),
                    owner.clone(),
                    pending,
                    context.clone(),
                );
                properties.insert(spec.name.clone(), Property::Dependency(Box::new(dependency)));
            }

            if let JsonValue::Object(map) = values.into_inner() {
                for (key, value) in map {
                    if !properties.contains_key(&key) {
                        properties.insert(key, Property::Value(value));
                    }
                }
            }

            tracing::debug!(chart = %name, %namespace, properties = properties.len(), "loaded chart");
            Ok(Chart {
                name,
                version,
                namespace,
                genus,
                read_only: options.read_only,
                skip_packaging: options.skip_packaging,
                source,
                properties,
                context: context.clone(),
            })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn genus(&self) -> &str {
        &self.genus
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Identity this chart registers under when it uses a shared chart
    pub fn owner_id(&self) -> String {
        owner_id(&self.namespace, &self.genus)
    }

    pub fn source(&self) -> &LoadedChart {
        &self.source
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Direct sub-charts in declaration order
    pub fn sub_charts(&self) -> impl Iterator<Item = &Chart> {
        self.properties.values().filter_map(|p| match p {
            Property::Chart(chart) => Some(chart.as_ref()),
            _ => None,
        })
    }

    /// Directly owned vaults in declaration order
    pub fn vaults(&self) -> impl Iterator<Item = &Vault> {
        self.properties.values().filter_map(|p| match p {
            Property::Vault(vault) => Some(vault),
            _ => None,
        })
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.properties.values().filter_map(|p| match p {
            Property::Dependency(dependency) => Some(dependency.as_ref()),
            _ => None,
        })
    }

    /// Number of progress slots the chart's executor needs
    fn child_count(&self) -> usize {
        self.properties
            .values()
            .filter(|p| matches!(p, Property::Chart(_) | Property::Dependency(_)))
            .count()
    }

    /// Current property values; vaults are not part of them
    pub fn values(&self) -> JsonValue {
        let mut map = Map::new();
        for (key, property) in &self.properties {
            let value = match property {
                Property::Value(value) => value.clone(),
                Property::Chart(chart) => chart.values(),
                Property::Dependency(dependency) => dependency.values(),
                Property::Vault(_) => continue,
            };
            map.insert(key.clone(), value);
        }
        JsonValue::Object(map)
    }

    /// Set a property by dotted path, descending into sub-charts
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if !self.properties.contains_key(head) {
            let mut nested = Values::new();
            nested.set(path, value)?;
            self.merge_values(&nested);
            return Ok(());
        }

        match (self.properties.get_mut(head), rest) {
            (Some(Property::Chart(chart)), Some(rest)) => chart.set(rest, value),
            (Some(Property::Dependency(dependency)), Some(rest)) => dependency.set(rest, value),
            (Some(Property::Vault(_)), _) | (Some(Property::Chart(_)), None) => Err(
                KubeError::Source(format!("property '{head}' of chart '{}' cannot be replaced", self.name)),
            ),
            (Some(Property::Dependency(dependency)), None) => {
                dependency.merge(&Values(value));
                Ok(())
            }
            (Some(Property::Value(current)), Some(rest)) => {
                let mut nested = Values(current.clone());
                nested.set(rest, value)?;
                *current = nested.into_inner();
                Ok(())
            }
            (Some(Property::Value(current)), None) => {
                *current = value;
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    /// Merge values over the properties; overrides win, nothing else is lost
    pub fn merge_values(&mut self, overlay: &Values) {
        let JsonValue::Object(map) = overlay.inner() else {
            return;
        };
        for (key, value) in map {
            match self.properties.get_mut(key) {
                Some(Property::Value(current)) => {
                    let mut merged = Values(current.clone());
                    merged.merge(&Values(value.clone()));
                    *current = merged.into_inner();
                }
                Some(Property::Chart(chart)) => chart.merge_values(&Values(value.clone())),
                Some(Property::Dependency(dependency)) => {
                    dependency.merge(&Values(value.clone()))
                }
                Some(Property::Vault(_)) => {
                    tracing::warn!(chart = %self.name, vault = %key, "ignoring value for vault");
                }
                None => {
                    self.properties
                        .insert(key.clone(), Property::Value(value.clone()));
                }
            }
        }
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Apply the whole tree below and including this chart
    pub fn apply<'a>(
        &'a mut self,
        executor: &'a dyn ClusterExecutor,
        opts: &'a ExecOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = self.apply_tree(executor, opts).await;
            result.map_err(|e| self.with_context(e, Phase::Apply))
        })
    }

    async fn apply_tree(&mut self, executor: &dyn ClusterExecutor, opts: &ExecOptions) -> Result<()> {
        opts.context.check()?;
        let scoped = executor.for_sub_chart(
            &self.namespace,
            &self.name,
            &self.version,
            self.child_count(),
        );
        let read_only = self.read_only;

        for property in self.properties.values_mut() {
            match property {
                Property::Chart(chart) => chart.apply(scoped.as_ref(), opts).await?,
                Property::Dependency(dependency) if !read_only => {
                    dependency.apply(scoped.as_ref(), opts).await?
                }
                Property::Dependency(dependency) => dependency.skip_progress(scoped.as_ref()),
                _ => {}
            }
        }

        self.read_vaults(scoped.as_ref(), opts).await?;
        if !read_only {
            let stream = self.local_objects(scoped.as_ref(), opts).await?;
            scoped.apply(stream, opts).await?;
        }

        scoped.progress(100);
        tracing::info!(chart = %self.name, namespace = %self.namespace, read_only, "applied chart");
        Ok(())
    }

    async fn read_vaults(&self, executor: &dyn ClusterExecutor, opts: &ExecOptions) -> Result<()> {
        for vault in self.vaults() {
            vault
                .read(executor, opts)
                .await
                .map_err(|e| e.in_chart(&self.name, Phase::Vaults))?;
        }
        Ok(())
    }

    /// Rendered objects, vault secrets and the packaged record
    async fn local_objects(
        &self,
        executor: &dyn ClusterExecutor,
        opts: &ExecOptions,
    ) -> Result<ObjectStream> {
        for vault in self.vaults() {
            opts.context
                .run(vault.ensure())
                .await
                .map_err(|e| e.in_chart(&self.name, Phase::Vaults))?;
        }

        let mut values = self.values();
        self.add_vault_values(&mut values, false).await?;
        let rendered = self.render(values)?;

        let mut extra = Vec::new();
        for vault in self.vaults() {
            extra.push(vault.object(&self.namespace).await?);
        }
        if !self.skip_packaging {
            let used_by = self.current_users(executor, opts).await?;
            extra.push(self.record(used_by)?.to_object(&self.context.settings)?);
        }

        Ok(rendered.chain(ObjectStream::from_objects(extra)))
    }

    /// Users of an already installed record, kept across re-applies
    async fn current_users(
        &self,
        executor: &dyn ClusterExecutor,
        opts: &ExecOptions,
    ) -> Result<BTreeSet<String>> {
        let settings = &self.context.settings;
        match executor
            .get("Secret", &settings.record_name(&self.name), opts)
            .await
        {
            Ok(object) => Ok(PackagedChart::from_object(settings, &object)?.used_by),
            Err(e) if e.is_not_found() => Ok(BTreeSet::new()),
            Err(e) => Err(e),
        }
    }

    /// The packaged record describing this chart
    pub fn record(&self, used_by: BTreeSet<String>) -> Result<PackagedChart> {
        Ok(PackagedChart {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            genus: self.genus.clone(),
            version: self.version.clone(),
            values: self.values(),
            archive: self.package()?,
            used_by,
        })
    }

    /// Add each vault's attributes under its name
    async fn add_vault_values(&self, values: &mut JsonValue, current_only: bool) -> Result<()> {
        let JsonValue::Object(map) = values else {
            return Ok(());
        };
        for vault in self.vaults() {
            let vault_values = if current_only {
                vault.current_values().await
            } else {
                vault.template_values().await
            };
            let vault_values = vault_values.map_err(|e| e.in_chart(&self.name, Phase::Vaults))?;
            map.insert(vault.name().to_string(), vault_values);
        }
        Ok(())
    }

    fn render(&self, values: JsonValue) -> Result<ObjectStream> {
        let context = RenderContext {
            chart: ChartInfo {
                name: self.name.clone(),
                version: self.version.to_string(),
                namespace: self.namespace.clone(),
                genus: self.genus.clone(),
            },
            values,
        };
        let text = self
            .context
            .renderer
            .render(&self.source, &context)
            .map_err(|e| KubeError::from(e).in_chart(&self.name, Phase::Template))?;
        Ok(ObjectStream::decode(&text))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete the whole tree; `recursive` also deletes shared dependencies
    /// nobody uses anymore
    pub fn delete<'a>(
        &'a mut self,
        executor: &'a dyn ClusterExecutor,
        opts: &'a ExecOptions,
        recursive: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = self.delete_tree(executor, opts, recursive).await;
            result.map_err(|e| self.with_context(e, Phase::Delete))
        })
    }

    async fn delete_tree(
        &mut self,
        executor: &dyn ClusterExecutor,
        opts: &ExecOptions,
        recursive: bool,
    ) -> Result<()> {
        opts.context.check()?;
        let scoped = executor.for_sub_chart(
            &self.namespace,
            &self.name,
            &self.version,
            self.child_count(),
        );
        let read_only = self.read_only;

        for property in self.properties.values_mut() {
            match property {
                Property::Chart(chart) => chart.delete(scoped.as_ref(), opts, recursive).await?,
                Property::Dependency(dependency) if !read_only => {
                    dependency.delete(scoped.as_ref(), opts, recursive).await?
                }
                Property::Dependency(dependency) => dependency.skip_progress(scoped.as_ref()),
                _ => {}
            }
        }

        self.read_vaults(scoped.as_ref(), opts).await?;
        if !read_only {
            let stream = self.local_refs().await?;
            scoped.delete(stream, opts).await?;

            for vault in self.vaults() {
                opts.context
                    .run(vault.release())
                    .await
                    .map_err(|e| e.in_chart(&self.name, Phase::Vaults))?;
            }
        }

        scoped.progress(100);
        tracing::info!(chart = %self.name, namespace = %self.namespace, read_only, "deleted chart");
        Ok(())
    }

    /// Everything apply would have created, rendered from the vault data
    /// as read; vault backends are not run
    async fn local_refs(&self) -> Result<ObjectStream> {
        let mut values = self.values();
        self.add_vault_values(&mut values, true).await?;
        let rendered = self.render(values)?;

        let mut refs: Vec<Object> = self
            .vaults()
            .map(|vault| vault.secret_ref(&self.namespace))
            .collect();
        if !self.skip_packaging {
            refs.push(
                Object::new("v1", "Secret", self.context.settings.record_name(&self.name))
                    .with_namespace(&self.namespace),
            );
        }
        Ok(rendered.chain(ObjectStream::from_objects(refs)))
    }

    // ========================================================================
    // Template and package
    // ========================================================================

    /// Render the whole tree into one sorted stream without a cluster
    ///
    /// Vaults produce placeholders where their backend supports it.
    pub fn template<'a>(&'a self, opts: &'a ExecOptions) -> BoxFuture<'a, Result<ObjectStream>> {
        Box::pin(async move {
            let result = self.template_tree(opts).await;
            result.map_err(|e| self.with_context(e, Phase::Template))
        })
    }

    async fn template_tree(&self, opts: &ExecOptions) -> Result<ObjectStream> {
        opts.context.check()?;
        let mut streams = Vec::new();
        for chart in self.sub_charts() {
            streams.push(chart.template(opts).await?);
        }

        if !self.read_only {
            for vault in self.vaults() {
                opts.context
                    .run(vault.ensure())
                    .await
                    .map_err(|e| e.in_chart(&self.name, Phase::Vaults))?;
            }
            let mut values = self.values();
            self.add_vault_values(&mut values, false).await?;
            let namespace = self.namespace.clone();
            streams.push(
                self.render(values)?
                    .map(move |obj| obj.set_default_namespace(&namespace)),
            );

            let mut extra = Vec::new();
            for vault in self.vaults() {
                extra.push(vault.object(&self.namespace).await?);
            }
            if !self.skip_packaging {
                extra.push(self.record(BTreeSet::new())?.to_object(&self.context.settings)?);
            }
            streams.push(ObjectStream::from_objects(extra));
        }

        Ok(ObjectStream::concat(streams).sort(false))
    }

    /// tar.gz of the chart source
    pub fn package(&self) -> Result<Vec<u8>> {
        Ok(archive::pack_directory(&self.source.root)?)
    }

    /// Attach this chart and `phase` unless the error already names it
    fn with_context(&self, err: KubeError, phase: Phase) -> KubeError {
        match &err {
            KubeError::Chart { chart, .. } if *chart == self.name && err.chart_path().len() == 1 => {
                err
            }
            _ => err.in_chart(&self.name, phase),
        }
    }
}

/// Identity a chart registers under when it uses a shared chart
pub fn owner_id(namespace: &str, genus: &str) -> String {
    format!("{namespace}-{genus}")
}
