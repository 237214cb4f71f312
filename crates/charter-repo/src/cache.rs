//! ETag-keyed artifact cache with generation swapping
//!
//! Every cached name owns a directory below the base directory:
//!
//! ```text
//! <base>/<sha256(name)>/metadata.yaml   {etag, generation, name}
//! <base>/<sha256(name)>/<generation>/   content, generation in hex
//! ```
//!
//! A load asks the loader for the current ETag. When it matches the stored
//! one the current generation is reused as is. Otherwise the loader writes
//! the new content into a fresh generation directory, the metadata is
//! replaced by an atomic rename and the previous generation is removed.
//! Readers therefore see either the old or the new generation, never a
//! partially written one. Concurrent writers of the same name must be
//! serialized by the caller.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{RepoError, Result};
use crate::http::FetchOutcome;

const METADATA_FILE: &str = "metadata.yaml";
const DOWNLOAD_FILE: &str = "download";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CacheMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    etag: String,

    #[serde(default)]
    generation: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
}

/// The directory of the next generation, created on first use
///
/// Handed to loaders; the cache learns from it whether new content was
/// written.
#[derive(Debug, Clone)]
pub struct GenerationDir {
    path: PathBuf,
    created: Arc<AtomicBool>,
}

impl GenerationDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            created: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create the directory (empty) and return its path
    pub fn get(&self) -> Result<PathBuf> {
        if !self.created.swap(true, Ordering::SeqCst) {
            if self.path.exists() {
                // leftover of an interrupted load
                std::fs::remove_dir_all(&self.path)?;
            }
            if let Err(err) = std::fs::create_dir_all(&self.path) {
                self.created.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        }
        Ok(self.path.clone())
    }

    fn was_created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    fn discard(&self) {
        if self.was_created() {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %err, "cannot remove unused generation");
            }
        }
    }
}

/// On-disk cache of downloaded and extracted artifacts
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    base_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(hex::encode(Sha256::digest(name.as_bytes())))
    }

    fn content_dir(entry: &Path, generation: u32) -> PathBuf {
        entry.join(format!("{generation:x}"))
    }

    fn read_metadata(entry: &Path) -> Result<CacheMetadata> {
        let path = entry.join(METADATA_FILE);
        if !path.exists() {
            return Ok(CacheMetadata::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(CacheMetadata::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    fn write_metadata(entry: &Path, metadata: &CacheMetadata) -> Result<()> {
        let tmp = entry.join(format!("{METADATA_FILE}.tmp"));
        std::fs::write(&tmp, serde_yaml::to_string(metadata)?)?;
        std::fs::rename(&tmp, entry.join(METADATA_FILE))?;
        Ok(())
    }

    /// Directory of the current generation of `name`, if any was written
    pub fn current(&self, name: &str) -> Result<Option<PathBuf>> {
        let entry = self.entry_dir(name);
        let metadata = Self::read_metadata(&entry)?;
        if metadata.generation == 0 {
            return Ok(None);
        }
        Ok(Some(Self::content_dir(&entry, metadata.generation)))
    }

    /// Load `name` through `loader`
    ///
    /// The loader receives the stored ETag (empty when nothing is cached)
    /// and the next generation directory, and returns the current ETag.
    /// Returning the stored ETag reuses the current generation. Returning
    /// another one requires the loader to have written the complete
    /// content into the generation directory.
    pub async fn load<F, Fut>(&self, name: &str, loader: F) -> Result<PathBuf>
    where
        F: FnOnce(String, GenerationDir) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let entry = self.entry_dir(name);
        std::fs::create_dir_all(&entry)?;
        let metadata = Self::read_metadata(&entry)?;
        let current = Self::content_dir(&entry, metadata.generation);
        let cached = metadata.generation != 0 && current.is_dir();
        // nothing usable on disk: the loader must fetch
        let stored = if cached {
            metadata.etag.clone()
        } else {
            String::new()
        };
        let next_generation = metadata.generation.wrapping_add(1);
        let target = GenerationDir::new(Self::content_dir(&entry, next_generation));

        let etag = match loader(stored.clone(), target.clone()).await {
            Ok(etag) => etag,
            Err(err) => {
                target.discard();
                return Err(err);
            }
        };

        if cached && etag == stored {
            target.discard();
            tracing::debug!(%name, etag = %etag, "cache hit");
            return Ok(current);
        }
        if !target.was_created() {
            return Err(RepoError::CacheWriteIncomplete {
                name: name.to_string(),
            });
        }

        Self::write_metadata(
            &entry,
            &CacheMetadata {
                etag,
                generation: next_generation,
                name: name.to_string(),
            },
        )?;
        if current.exists() {
            if let Err(err) = std::fs::remove_dir_all(&current) {
                tracing::warn!(path = %current.display(), error = %err, "cannot remove previous generation");
            }
        }
        tracing::debug!(%name, generation = next_generation, "cache refreshed");
        Ok(target.path)
    }

    /// Cache a single downloaded artifact and open it
    ///
    /// The loader receives the stored ETag and reports whether the content
    /// changed. Fresh content is stored as one file in the generation
    /// directory.
    pub async fn load_reader<F, Fut>(&self, name: &str, loader: F) -> Result<File>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<FetchOutcome>>,
    {
        let dir = self
            .load(name, |stored, target| async move {
                let outcome = loader(stored.clone()).await?;
                store_download(stored, &target, outcome)
            })
            .await?;
        Ok(File::open(dir.join(DOWNLOAD_FILE))?)
    }

    /// Read the cached download of `name` into memory
    pub async fn load_bytes<F, Fut>(&self, name: &str, loader: F) -> Result<Vec<u8>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<FetchOutcome>>,
    {
        let mut bytes = Vec::new();
        self.load_reader(name, loader).await?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Write fresh content as the download file; the ETag the cache records
fn store_download(stored: String, target: &GenerationDir, outcome: FetchOutcome) -> Result<String> {
    match outcome {
        FetchOutcome::NotModified => Ok(stored),
        FetchOutcome::Fresh { etag, .. } if !stored.is_empty() && etag == stored => Ok(stored),
        FetchOutcome::Fresh { bytes, etag } => {
            let dir = target.get()?;
            std::fs::write(dir.join(DOWNLOAD_FILE), &bytes)?;
            Ok(etag)
        }
    }
}
