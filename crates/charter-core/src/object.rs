//! Cluster object model
//!
//! An [`Object`] models only the fields the engine needs to reason about
//! (`apiVersion`, `kind` and the identifying metadata). Every other field,
//! at the top level or inside `metadata`, is carried verbatim so that
//! decoding and re-encoding an object never loses data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Kinds that live outside of any namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "namespace",
    "resourcequota",
    "customresourcedefinition",
    "clusterrole",
    "clusterrolelist",
    "clusterrolebinding",
    "clusterrolebindinglist",
    "apiservice",
];

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Metadata fields not modeled above (resourceVersion, uid, ...)
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A cluster object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Everything else (spec, data, status, type, ...)
    #[serde(flatten)]
    pub additional: Map<String, JsonValue>,
}

impl Object {
    /// Create an object with the given identity
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: Metadata {
                name: name.into(),
                ..Default::default()
            },
            additional: Map::new(),
        }
    }

    /// Builder-style namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    /// Builder-style top-level field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.additional.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(&self) -> bool {
        is_namespaced_kind(&self.kind)
    }

    /// Fill in the namespace for namespaced kinds that don't declare one
    pub fn set_default_namespace(&mut self, namespace: &str) {
        if self.metadata.namespace.is_empty() && self.is_namespaced() {
            self.metadata.namespace = namespace.to_string();
        }
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.labels.insert(key.into(), value.into());
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata
            .extra
            .get("resourceVersion")
            .and_then(JsonValue::as_str)
    }

    pub fn set_resource_version(&mut self, version: impl Into<String>) {
        self.metadata
            .extra
            .insert("resourceVersion".to_string(), JsonValue::String(version.into()));
    }

    /// A document without kind, name and any other field carries no object
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.metadata.name.is_empty() && self.additional.is_empty()
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }

    /// Build from a JSON value
    pub fn from_json(value: JsonValue) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Whether a kind is namespaced (case-insensitive)
pub fn is_namespaced_kind(kind: &str) -> bool {
    let kind = kind.to_ascii_lowercase();
    !CLUSTER_SCOPED_KINDS.contains(&kind.as_str())
}
