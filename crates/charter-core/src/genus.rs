//! Chart identity derived from source URLs
//!
//! The genus names "the same logical chart" regardless of which version or
//! mirror it was fetched from. Two dependencies with the same genus in the
//! same namespace share one installed chart.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

static GITHUB_RELEASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://(github[^/]*/[^/]*/[^/]*)/releases/download/([^/]*)/[^/]*")
        .expect("valid regex")
});
static GITHUB_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://(github[^/]*/[^/]*/[^/]*)/archive/(.*)\.(?:zip|tar\.gz|tgz)")
        .expect("valid regex")
});
static GITHUB_ENTERPRISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://(github[^/]*)/api/v3/repos/([^/]*/[^/]*)/(?:zipball|tarball)/(.*)")
        .expect("valid regex")
});
static VERSIONED_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(https|http)://(.*)/(v?\d+\.\d+\.\d+)").expect("valid regex")
});
static CATALOG_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"catalog:(.*)").expect("valid regex"));
static INVALID_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^-A-Za-z0-9_.]").expect("valid regex"));

/// Genus and version guessed from a URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenusAndVersion {
    /// Label-safe genus, empty when the URL has no recognizable shape
    pub genus: String,
    pub version: Option<Version>,
}

impl GenusAndVersion {
    /// Guess genus and version from a chart URL
    pub fn from_url(url: &str) -> Self {
        if let Some(c) = GITHUB_RELEASE.captures(url) {
            return Self::extract(&c[1], &c[2]);
        }
        if let Some(c) = GITHUB_ARCHIVE.captures(url) {
            return Self::extract(&c[1], &c[2]);
        }
        if let Some(c) = GITHUB_ENTERPRISE.captures(url) {
            return Self::extract(&format!("{}/{}", &c[1], &c[2]), &c[3]);
        }
        if let Some(c) = VERSIONED_URL.captures(url) {
            return Self::extract(&c[2], &c[3]);
        }
        if let Some(c) = CATALOG_URL.captures(url) {
            return Self::extract(&c[1], "");
        }
        Self::default()
    }

    fn extract(name: &str, version: &str) -> Self {
        Self {
            genus: label_safe(name),
            version: parse_version(version),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genus.is_empty()
    }
}

/// Replace characters that are not allowed in label values with `_`
pub fn label_safe(value: &str) -> String {
    INVALID_LABEL.replace_all(value, "_").into_owned()
}

/// Drop characters that are not allowed in label values
pub fn strip_label(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Lenient semver parse accepting a leading `v`
pub fn parse_version(version: &str) -> Option<Version> {
    Version::parse(version.trim_start_matches('v')).ok()
}

/// Name of the catalog entry for `catalog:<name>` URLs
pub fn catalog_name(url: &str) -> Option<&str> {
    url.strip_prefix("catalog:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Option<Version> {
        Some(Version::parse(s).unwrap())
    }

    #[test]
    fn test_github_release() {
        let gv = GenusAndVersion::from_url(
            "https://github.com/acme/charts/releases/download/v0.6.1/mariadb-0.6.1.tgz",
        );
        assert_eq!(gv.genus, "github.com_acme_charts");
        assert_eq!(gv.version, v("0.6.1"));

        // every asset of a release repository shares the genus
        let other = GenusAndVersion::from_url(
            "https://github.com/acme/charts/releases/download/v0.6.1/redis-0.6.1.tgz",
        );
        assert_eq!(other.genus, gv.genus);
    }

    #[test]
    fn test_github_archive() {
        let gv = GenusAndVersion::from_url("https://github.com/acme/charts/archive/0.6.1.zip");
        assert_eq!(gv.genus, "github.com_acme_charts");
        assert_eq!(gv.version, v("0.6.1"));

        let gv = GenusAndVersion::from_url("https://github.com/acme/charts/archive/v1.2.3.tar.gz");
        assert_eq!(gv.version, v("1.2.3"));
    }

    #[test]
    fn test_github_enterprise() {
        let gv = GenusAndVersion::from_url(
            "https://github.example.com/api/v3/repos/team/platform-db/zipball/v0.6.1",
        );
        assert_eq!(gv.genus, "github.example.com_team_platform-db");
        assert_eq!(gv.version, v("0.6.1"));
    }

    #[test]
    fn test_versioned_url() {
        let gv = GenusAndVersion::from_url("https://charts.example.com/mariadb/v0.6.1");
        assert_eq!(gv.genus, "charts.example.com_mariadb");
        assert_eq!(gv.version, v("0.6.1"));
    }

    #[test]
    fn test_catalog() {
        let gv = GenusAndVersion::from_url("catalog:istio");
        assert_eq!(gv.genus, "istio");
        assert_eq!(gv.version, None);
        assert_eq!(catalog_name("catalog:istio"), Some("istio"));
    }

    #[test]
    fn test_unrecognized_url_has_no_genus() {
        assert!(GenusAndVersion::from_url("./charts/local").is_empty());
        assert!(GenusAndVersion::from_url("https://example.com/latest.tgz").is_empty());
    }

    #[test]
    fn test_label_safe() {
        assert_eq!(label_safe("a/b:c d"), "a_b_c_d");
        assert_eq!(label_safe("ok-1.2_x"), "ok-1.2_x");
    }
}
