//! Charter Repository - where charts come from
//!
//! This crate turns chart URLs and packaged-chart records into loaded
//! charts:
//!
//! - **ArtifactCache**: ETag-keyed on-disk cache with atomic generation swaps
//! - **EtagFetcher**: conditional HTTP downloads with scoped credentials
//! - **SourceResolver**: local directories, archives, URLs, catalogs and fragments
//! - **Repository**: the `ChartRepository` the chart tree loads dependencies through
//!
//! ## Example
//!
//! ```rust,no_run
//! use charter_core::Settings;
//! use charter_repo::{Repository, RepositoryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::discover()?;
//! let repository = Repository::new(&settings, RepositoryConfig::discover()?)?;
//! let dir = repository.resolve("https://charts.example.com/postgres/1.2.0").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod source;

pub use cache::{ArtifactCache, GenerationDir};
pub use config::{Credential, RepositoryConfig};
pub use error::{RepoError, Result};
pub use http::{EtagFetcher, FetchOutcome};
pub use source::SourceResolver;

use async_trait::async_trait;
use charter_core::archive::unpack_archive;
use charter_core::{GenusAndVersion, LoadedChart, Settings};
use charter_kube::{Chart, ChartContext, ChartOptions, ChartRepository, PackagedChart};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

/// Chart sources backed by the on-disk cache
#[derive(Debug, Clone)]
pub struct Repository {
    resolver: SourceResolver,
    packaged: ArtifactCache,
}

impl Repository {
    /// Downloads go to `<cache_dir>/etag`, unpacked records to `<cache_dir>/charts`
    pub fn new(settings: &Settings, config: RepositoryConfig) -> Result<Self> {
        let resolver = SourceResolver::new(
            ArtifactCache::new(settings.cache_dir.join("etag")),
            Arc::new(config),
        )?;
        Ok(Self {
            resolver,
            packaged: ArtifactCache::new(settings.cache_dir.join("charts")),
        })
    }

    /// Directory of the chart `url` points to
    pub async fn resolve(&self, url: &str) -> Result<PathBuf> {
        self.resolver.resolve(url).await
    }

    /// Load a chart source from a URL
    pub async fn load_source(&self, url: &str) -> Result<LoadedChart> {
        let dir = self.resolve(url).await?;
        LoadedChart::load(&dir).map_err(|e| RepoError::NotFound {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Unpack a packaged record once per distinct archive
    pub async fn unpack_record(&self, record: &PackagedChart) -> Result<PathBuf> {
        let digest = hex::encode(Sha256::digest(&record.archive));
        let key = format!("sha256:{digest}");
        let archive = record.archive.as_slice();
        self.packaged
            .load(&key, |stored, target| async move {
                if stored == digest {
                    return Ok(stored);
                }
                unpack_archive(archive, &target.get()?)?;
                Ok::<_, RepoError>(digest)
            })
            .await
    }
}

#[async_trait]
impl ChartRepository for Repository {
    async fn load(
        &self,
        url: &str,
        options: ChartOptions,
        context: &ChartContext,
    ) -> charter_kube::Result<Chart> {
        let source = self.load_source(url).await?;
        let options = options.with_genus_and_version(GenusAndVersion::from_url(url));
        Chart::load(source, options, context).await
    }

    async fn load_packaged(
        &self,
        record: &PackagedChart,
        options: ChartOptions,
        context: &ChartContext,
    ) -> charter_kube::Result<Chart> {
        let dir = self.unpack_record(record).await?;
        let source = LoadedChart::load(&dir)?;
        Chart::load(source, options, context).await
    }
}
