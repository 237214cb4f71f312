//! Chart definition (Chart.yaml) and loaded chart sources

use indexmap::IndexSet;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

pub const MANIFEST_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const TEMPLATES_DIR: &str = "templates";
pub const API_VERSION: &str = "charter/v1";

/// Chart.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartManifest {
    /// API version (charter/v1)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub name: String,

    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Namespace the chart deploys into unless overridden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Sub-charts, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<SubChartSpec>,

    /// Vaults, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vaults: Vec<VaultSpec>,

    /// Shared dependencies, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencySpec>,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

/// A sub-chart reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubChartSpec {
    pub name: String,

    /// Directory relative to the parent chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Remote or catalog source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub values: Values,
}

/// A vault declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSpec {
    pub name: String,

    #[serde(flatten)]
    pub backend: BackendSpec,
}

/// Vault backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSpec {
    Credential(CredentialSpec),
    Certificate(CertificateSpec),
    Binding(BindingSpec),
    Prompt(PromptSpec),
}

/// Username/password pair; unset fields are generated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// X.509 certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateSpec {
    #[serde(default)]
    pub domains: Vec<String>,

    /// ISO-8601 period, e.g. P3M or P1Y
    #[serde(default = "default_validity")]
    pub validity: String,

    #[serde(default)]
    pub is_ca: bool,

    /// Name of the vault holding the issuing CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

fn default_validity() -> String {
    "P3M".to_string()
}

/// Open Service Broker binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    /// Broker base URL
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Service offering name from the broker catalog
    pub service: String,

    /// Plan name within the offering
    pub plan: String,

    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub parameters: JsonValue,

    /// Seconds between last_operation polls when the broker gives no hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

/// A value asked from the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Mask input
    #[serde(default)]
    pub secret: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Restrict the answer to one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A shared dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,

    pub url: String,

    #[serde(default = "default_constraint")]
    pub constraint: VersionReq,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub values: Values,
}

fn default_constraint() -> VersionReq {
    VersionReq::STAR
}

impl ChartManifest {
    /// Parse and validate Chart.yaml content
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: ChartManifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(CoreError::InvalidManifest { message });

        if self.api_version != API_VERSION {
            return invalid(format!(
                "Unsupported API version: {}. Expected: {}",
                self.api_version, API_VERSION
            ));
        }
        if !is_valid_name(&self.name) {
            return invalid(format!("invalid chart name '{}'", self.name));
        }

        let mut seen = IndexSet::new();
        let names = self
            .charts
            .iter()
            .map(|c| &c.name)
            .chain(self.vaults.iter().map(|v| &v.name))
            .chain(self.dependencies.iter().map(|d| &d.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return invalid(format!("duplicate property '{}'", name));
            }
        }

        for chart in &self.charts {
            if chart.path.is_some() == chart.url.is_some() {
                return invalid(format!(
                    "sub-chart '{}' needs exactly one of path or url",
                    chart.name
                ));
            }
        }

        for (index, vault) in self.vaults.iter().enumerate() {
            if let BackendSpec::Certificate(CertificateSpec {
                signer: Some(signer),
                ..
            }) = &vault.backend
            {
                let declared_before = self.vaults[..index].iter().any(|v| {
                    &v.name == signer && matches!(v.backend, BackendSpec::Certificate(_))
                });
                if !declared_before {
                    return invalid(format!(
                        "certificate '{}' is signed by '{}', which must be a certificate vault declared before it",
                        vault.name, signer
                    ));
                }
            }
        }

        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/'))
}

/// A chart directory loaded from disk
#[derive(Debug, Clone)]
pub struct LoadedChart {
    pub manifest: ChartManifest,

    /// Root directory of the chart
    pub root: PathBuf,

    /// Defaults from values.yaml
    pub values: Values,
}

impl LoadedChart {
    /// Load a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let manifest_file = root.join(MANIFEST_FILE);
        if !manifest_file.exists() {
            return Err(CoreError::InvalidManifest {
                message: format!("{} not found in {}", MANIFEST_FILE, root.display()),
            });
        }
        let manifest = ChartManifest::parse(&std::fs::read_to_string(&manifest_file)?)?;

        let values_path = root.join(VALUES_FILE);
        let values = if values_path.exists() {
            Values::from_file(&values_path)?
        } else {
            Values::new()
        };

        Ok(Self {
            manifest,
            root,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    /// Template files, sorted by path
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        let templates_dir = self.root.join(TEMPLATES_DIR);
        let mut files = Vec::new();

        if !templates_dir.exists() {
            return Ok(files);
        }

        for entry in walkdir::WalkDir::new(&templates_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() {
                if let Some(ext) = path.extension() {
                    let ext = ext.to_string_lossy().to_lowercase();
                    if matches!(ext.as_str(), "yaml" | "yml" | "j2" | "json") {
                        files.push(path.to_path_buf());
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Directory of a local sub-chart
    pub fn subchart_dir(&self, spec: &SubChartSpec) -> Option<PathBuf> {
        spec.path.as_ref().map(|p| self.root.join(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
apiVersion: charter/v1
name: shop
version: 1.2.0
charts:
  - name: db
    path: charts/db
    values:
      replicas: 2
  - name: cache
    url: https://charts.example.com/cache/v1.0.0
vaults:
  - name: ca
    certificate:
      is_ca: true
  - name: tls
    certificate:
      domains: [shop.example.com]
      signer: ca
  - name: admin
    credential:
      username: admin
dependencies:
  - name: ingress
    url: catalog:ingress
    constraint: ">=1.0.0"
"#;

    #[test]
    fn test_parse_manifest_keeps_declaration_order() {
        let manifest = ChartManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.name, "shop");
        assert_eq!(manifest.version, Version::new(1, 2, 0));

        let charts: Vec<_> = manifest.charts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(charts, vec!["db", "cache"]);

        let vaults: Vec<_> = manifest.vaults.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(vaults, vec!["ca", "tls", "admin"]);

        match &manifest.vaults[1].backend {
            BackendSpec::Certificate(spec) => {
                assert_eq!(spec.signer.as_deref(), Some("ca"));
                assert_eq!(spec.validity, "P3M");
            }
            other => panic!("unexpected backend {other:?}"),
        }
        assert!(manifest.dependencies[0]
            .constraint
            .matches(&Version::new(1, 4, 0)));
    }

    #[test]
    fn test_rejects_duplicate_properties() {
        let content = r#"
apiVersion: charter/v1
name: dup
version: 0.1.0
charts:
  - name: x
    path: x
vaults:
  - name: x
    credential: {}
"#;
        let err = ChartManifest::parse(content).unwrap_err();
        assert!(err.to_string().contains("duplicate property 'x'"));
    }

    #[test]
    fn test_rejects_unknown_signer() {
        let content = r#"
apiVersion: charter/v1
name: certs
version: 0.1.0
vaults:
  - name: tls
    certificate:
      signer: ca
"#;
        assert!(ChartManifest::parse(content).is_err());
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let content = "apiVersion: v2\nname: x\nversion: 0.1.0\n";
        assert!(ChartManifest::parse(content).is_err());
    }

    #[test]
    fn test_load_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        std::fs::write(temp.path().join(VALUES_FILE), "replicas: 3\n").unwrap();
        let templates = temp.path().join(TEMPLATES_DIR);
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("b.yaml"), "kind: ConfigMap\n").unwrap();
        std::fs::write(templates.join("a.yaml"), "kind: Secret\n").unwrap();
        std::fs::write(templates.join("README.md"), "ignored").unwrap();

        let chart = LoadedChart::load(temp.path()).unwrap();
        assert_eq!(chart.name(), "shop");
        assert_eq!(chart.values.get("replicas").unwrap(), 3);

        let files = chart.template_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.yaml"));

        let db = chart.subchart_dir(&chart.manifest.charts[0]).unwrap();
        assert!(db.ends_with("charts/db"));
        assert!(chart.subchart_dir(&chart.manifest.charts[1]).is_none());
    }

    #[test]
    fn test_load_missing_directory() {
        let err = LoadedChart::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, CoreError::ChartNotFound { .. }));
    }
}
