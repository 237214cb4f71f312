//! Immutable engine settings
//!
//! Settings are built once (defaults, optionally overlaid by a YAML file)
//! and handed to every component at construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Engine version stamped into labels
    pub version: String,

    /// Prefix of packaged-chart record names
    pub record_prefix: String,

    /// Domain of every label and annotation key the engine writes
    pub label_domain: String,

    /// Field manager for server-side apply
    pub field_manager: String,

    pub default_namespace: String,

    /// Root of the artifact cache
    pub cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            record_prefix: "charter".to_string(),
            label_domain: "charter.io".to_string(),
            field_manager: "charter".to_string(),
            default_namespace: "default".to_string(),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("charter"),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Default location: `<config dir>/charter/settings.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("charter").join("settings.yaml"))
    }

    /// Load from the default location when it exists
    pub fn discover() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Fully qualified label or annotation key
    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.label_domain, name)
    }

    /// Name of the packaged-chart record of a chart
    pub fn record_name(&self, chart_name: &str) -> String {
        format!("{}.chart.{}", self.record_prefix, chart_name)
    }

    /// Secret type of packaged-chart records
    pub fn record_type(&self) -> String {
        format!("{}/chart", self.label_domain)
    }
}
