//! Repository configuration
//!
//! Stored in `~/.config/charter/repositories.yaml`:
//!
//! ```yaml
//! credentials:
//!   - url: https://github.com/acme
//!     token: ghp_xxx
//!   - url: https://charts.example.com
//!     username: deploy
//!     password: secret
//! catalogs:
//!   - https://charts.example.com/catalog
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Credentials for every URL starting with `url`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credential {
    /// `Authorization` header value; a token wins over basic auth
    pub fn authorization(&self) -> Option<String> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Some(format!("Bearer {token}"));
        }
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().unwrap_or_default();
        Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        ))
    }
}

/// URL and credential kind, never the secret
impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match (&self.token, &self.username) {
            (Some(_), _) => "token",
            (None, Some(_)) => "basic",
            (None, None) => "none",
        };
        write!(f, "{} ({kind})", self.url)
    }
}

/// Repository configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Credentials matched by longest URL prefix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,

    /// Base URLs tried in order for `catalog:<name>` sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalogs: Vec<String>,
}

impl RepositoryConfig {
    /// Load from the default location when it exists
    pub fn discover() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// `<config dir>/charter/repositories.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("charter").join("repositories.yaml"))
    }

    /// The credential with the longest URL prefix of `url`
    pub fn credential_for(&self, url: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .filter(|c| !c.url.is_empty() && url.starts_with(c.url.as_str()))
            .max_by_key(|c| c.url.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> RepositoryConfig {
        RepositoryConfig {
            credentials: vec![
                Credential {
                    url: "https://github.com".into(),
                    token: Some("broad".into()),
                    ..Default::default()
                },
                Credential {
                    url: "https://github.com/acme".into(),
                    username: Some("deploy".into()),
                    password: Some("s3cret".into()),
                    ..Default::default()
                },
            ],
            catalogs: vec!["https://charts.example.com".into()],
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = config();
        let acme = config.credential_for("https://github.com/acme/shop/archive/v1.0.0.tgz");
        assert_eq!(acme.unwrap().username.as_deref(), Some("deploy"));

        let other = config.credential_for("https://github.com/other/repo");
        assert_eq!(other.unwrap().token.as_deref(), Some("broad"));

        assert!(config.credential_for("https://gitlab.com/acme").is_none());
    }

    #[test]
    fn test_authorization_header() {
        let config = config();
        assert_eq!(
            config.credentials[0].authorization().as_deref(),
            Some("Bearer broad")
        );
        assert_eq!(
            config.credentials[1].authorization().as_deref(),
            Some("Basic ZGVwbG95OnMzY3JldA==")
        );
        assert_eq!(Credential::default().authorization(), None);
        assert_eq!(config.credentials[1].to_string(), "https://github.com/acme (basic)");
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/repositories.yaml");
        config().save_to(&path).unwrap();
        assert_eq!(RepositoryConfig::load_from(&path).unwrap(), config());

        std::fs::write(&path, "").unwrap();
        assert_eq!(RepositoryConfig::load_from(&path).unwrap(), RepositoryConfig::default());
    }
}
