//! Packaged-chart records
//!
//! Every applied chart leaves a Secret describing itself: its property
//! values, its source archive and the set of charts that use it. Shared
//! dependencies are found again through these records.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use charter_core::{Object, Settings, genus};
use semver::Version;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeSet;

use crate::error::{KubeError, Result};
use crate::executor::{ClusterExecutor, ExecOptions, LabelSelector};

const VALUES_KEY: &str = "values";
const CHART_KEY: &str = "chart";

/// Attempts of a read-modify-write on the user set before giving up
const MAX_CONFLICT_RETRIES: usize = 5;

/// Self-description of an installed chart
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedChart {
    pub name: String,
    pub namespace: String,
    pub genus: String,
    pub version: Version,

    /// Property values the chart was applied with
    pub values: JsonValue,

    /// tar.gz of the chart source
    pub archive: Vec<u8>,

    /// Identities of the charts depending on this one
    pub used_by: BTreeSet<String>,
}

impl PackagedChart {
    /// Build the record object
    pub fn to_object(&self, settings: &Settings) -> Result<Object> {
        let values = serde_json::to_vec(&self.values)?;
        let mut data = Map::new();
        data.insert(VALUES_KEY.to_string(), json!(STANDARD.encode(values)));
        data.insert(CHART_KEY.to_string(), json!(STANDARD.encode(&self.archive)));

        let mut object = Object::new("v1", "Secret", settings.record_name(&self.name))
            .with_namespace(&self.namespace)
            .with_field("type", json!(settings.record_type()))
            .with_field("data", JsonValue::Object(data));
        object.set_label(settings.key("chart"), "true");
        object.set_label(settings.key("genus"), genus::label_safe(&self.genus));
        object.set_label(settings.key("version"), self.version.to_string());
        object.set_annotation(settings.key("used-by"), self.used_by_json()?);
        Ok(object)
    }

    /// Parse a record object read from the cluster
    pub fn from_object(settings: &Settings, object: &Object) -> Result<Self> {
        let invalid = |message: &str| {
            KubeError::Source(format!("invalid chart record '{}': {message}", object.name()))
        };

        let prefix = settings.record_name("");
        let name = object
            .name()
            .strip_prefix(&prefix)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("unexpected name"))?
            .to_string();

        let labels = &object.metadata.labels;
        let version = labels
            .get(&settings.key("version"))
            .and_then(|v| genus::parse_version(v))
            .ok_or_else(|| invalid("missing or invalid version label"))?;
        let genus = labels
            .get(&settings.key("genus"))
            .cloned()
            .unwrap_or_default();

        let field = |key: &str| -> Result<Vec<u8>> {
            let encoded = object
                .additional
                .get("data")
                .and_then(|d| d.get(key))
                .and_then(JsonValue::as_str)
                .ok_or_else(|| invalid(&format!("missing data '{key}'")))?;
            Ok(STANDARD.decode(encoded)?)
        };
        let values = serde_json::from_slice(&field(VALUES_KEY)?)?;
        let archive = field(CHART_KEY)?;

        let used_by = match object.metadata.annotations.get(&settings.key("used-by")) {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => BTreeSet::new(),
        };

        Ok(Self {
            name,
            namespace: object.namespace().to_string(),
            genus,
            version,
            values,
            archive,
            used_by,
        })
    }

    fn used_by_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.used_by)?)
    }

    /// Records of every chart of `genus` in the namespace `opts` target
    pub async fn list(
        executor: &dyn ClusterExecutor,
        settings: &Settings,
        genus: &str,
        opts: &ExecOptions,
    ) -> Result<Vec<PackagedChart>> {
        let mut selector = LabelSelector::new();
        selector.insert(settings.key("chart"), "true".to_string());
        if !genus.is_empty() {
            selector.insert(settings.key("genus"), genus::label_safe(genus));
        }

        executor
            .list("Secret", opts, &selector)
            .await?
            .iter()
            .map(|object| Self::from_object(settings, object))
            .collect()
    }

    /// Register `user`; returns the number of users afterwards
    pub async fn add_user(
        &self,
        executor: &dyn ClusterExecutor,
        settings: &Settings,
        user: &str,
        opts: &ExecOptions,
    ) -> Result<usize> {
        self.update_users(executor, settings, opts, |users| {
            users.insert(user.to_string());
        })
        .await
    }

    /// Deregister `user`; returns the number of users afterwards
    pub async fn remove_user(
        &self,
        executor: &dyn ClusterExecutor,
        settings: &Settings,
        user: &str,
        opts: &ExecOptions,
    ) -> Result<usize> {
        self.update_users(executor, settings, opts, |users| {
            users.remove(user);
        })
        .await
    }

    /// Read the current record, change its user set and write it back,
    /// retrying when someone else wrote in between
    async fn update_users<F>(
        &self,
        executor: &dyn ClusterExecutor,
        settings: &Settings,
        opts: &ExecOptions,
        mut change: F,
    ) -> Result<usize>
    where
        F: FnMut(&mut BTreeSet<String>) + Send,
    {
        let opts = opts.clone().in_namespace(&self.namespace);
        let record_name = settings.record_name(&self.name);
        let key = settings.key("used-by");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut object = executor.get("Secret", &record_name, &opts).await?;
            let mut record = Self::from_object(settings, &object)?;
            let before = record.used_by.clone();
            change(&mut record.used_by);
            let count = record.used_by.len();
            if record.used_by == before {
                return Ok(count);
            }

            object.set_annotation(key.clone(), record.used_by_json()?);
            match executor.replace(object, &opts).await {
                Ok(_) => {
                    tracing::debug!(chart = %self.name, users = count, "updated chart users");
                    return Ok(count);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    tracing::debug!(chart = %self.name, attempt, "user set changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
