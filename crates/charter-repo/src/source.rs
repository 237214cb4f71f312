//! Chart sources
//!
//! A chart URL resolves to a local directory holding `Chart.yaml`:
//!
//! - an existing directory is used in place
//! - a local `.tgz` is extracted into the cache, keyed by its mtime
//! - `http(s)://` archives are downloaded and extracted through the cache
//! - `catalog:<name>` is tried against every configured catalog in order
//! - a `#fragment` selects a sub-directory of whatever the rest resolves to
//!
//! Archives with a single top-level directory (GitHub release and archive
//! downloads) resolve to that directory.

use charter_core::chart::MANIFEST_FILE;
use charter_core::archive::unpack_archive;
use charter_core::genus::catalog_name;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::cache::ArtifactCache;
use crate::config::RepositoryConfig;
use crate::error::{RepoError, Result};
use crate::http::{EtagFetcher, FetchOutcome};

/// Turns chart URLs into chart directories
#[derive(Debug, Clone)]
pub struct SourceResolver {
    cache: ArtifactCache,
    fetcher: EtagFetcher,
    config: Arc<RepositoryConfig>,
}

impl SourceResolver {
    pub fn new(cache: ArtifactCache, config: Arc<RepositoryConfig>) -> Result<Self> {
        Ok(Self {
            cache,
            fetcher: EtagFetcher::new(Arc::clone(&config))?,
            config,
        })
    }

    /// Directory of the chart `url` points to
    pub async fn resolve(&self, url: &str) -> Result<PathBuf> {
        let dir = match catalog_name(url) {
            Some(name) => self.resolve_catalog(url, name).await?,
            None => self.resolve_with_fragment(url).await?,
        };
        tracing::debug!(%url, dir = %dir.display(), "resolved chart source");
        Ok(dir)
    }

    async fn resolve_catalog(&self, url: &str, name: &str) -> Result<PathBuf> {
        let mut last_error = None;
        for catalog in &self.config.catalogs {
            let candidate = format!("{}/{}", catalog.trim_end_matches('/'), name);
            match self.resolve_with_fragment(&candidate).await {
                Ok(dir) => return Ok(dir),
                Err(err) => {
                    tracing::debug!(%candidate, error = %err, "catalog miss");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RepoError::NotFound {
            url: url.to_string(),
            reason: "no catalogs configured".to_string(),
        }))
    }

    async fn resolve_with_fragment(&self, url: &str) -> Result<PathBuf> {
        match url.split_once('#') {
            Some((base, fragment)) if !fragment.is_empty() => {
                let escapes = Path::new(fragment)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
                if escapes {
                    return Err(RepoError::NotFound {
                        url: url.to_string(),
                        reason: format!("fragment '{fragment}' leaves the chart source"),
                    });
                }
                let dir = self.resolve_plain(base).await?;
                Ok(dir.join(fragment))
            }
            _ => self.resolve_plain(url).await,
        }
    }

    async fn resolve_plain(&self, url: &str) -> Result<PathBuf> {
        if is_remote(url) {
            let dir = self.download(url).await?;
            return Ok(chart_root(dir));
        }

        let path = Path::new(url);
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        if path.is_file() {
            let dir = self.extract_local(path).await?;
            return Ok(chart_root(dir));
        }
        Err(RepoError::NotFound {
            url: url.to_string(),
            reason: "no such file or directory".to_string(),
        })
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        let fetcher = &self.fetcher;
        self.cache
            .load(url, |stored, target| async move {
                match fetcher.fetch(url, &stored).await? {
                    FetchOutcome::NotModified => Ok::<_, RepoError>(stored),
                    FetchOutcome::Fresh { bytes, etag } => {
                        unpack_archive(bytes.as_slice(), &target.get()?)?;
                        Ok(etag)
                    }
                }
            })
            .await
    }

    async fn extract_local(&self, path: &Path) -> Result<PathBuf> {
        let modified = std::fs::metadata(path)?.modified()?;
        let tag = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| format!("{:x}", d.as_nanos()))
            .unwrap_or_default();
        let name = path.canonicalize()?.display().to_string();

        self.cache
            .load(&name, |stored, target| async move {
                if stored == tag {
                    return Ok(stored);
                }
                let file = std::fs::File::open(path)?;
                unpack_archive(file, &target.get()?)?;
                Ok::<_, RepoError>(tag)
            })
            .await
    }
}

fn is_remote(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// The directory holding `Chart.yaml`: `dir` itself or its only child
fn chart_root(dir: PathBuf) -> PathBuf {
    if dir.join(MANIFEST_FILE).exists() {
        return dir;
    }
    let children: Vec<PathBuf> = std::fs::read_dir(&dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    match children.as_slice() {
        [only] if only.join(MANIFEST_FILE).exists() => only.clone(),
        _ => dir,
    }
}
