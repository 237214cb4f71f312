//! Archive creation and extraction for chart sources
//!
//! Charts travel as `.tgz` archives: inside the packaged-chart record and as
//! the output of `charter package`. Archives are reproducible, so packaging
//! an unchanged chart yields identical bytes.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::chart::LoadedChart;
use crate::error::{CoreError, Result};

/// Pack every file below `dir` into a gzipped tarball
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    for file_path in files {
        let rel_path = file_path
            .strip_prefix(dir)
            .map_err(|e| CoreError::Archive {
                message: e.to_string(),
            })?
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read(&file_path)?;
        add_bytes_to_archive(&mut builder, &rel_path, &content)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Write `<name>-<version>.tgz` for a chart into `output_dir`
pub fn write_chart_archive(chart: &LoadedChart, output_dir: &Path) -> Result<PathBuf> {
    let bytes = pack_directory(&chart.root)?;
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(default_archive_name(chart));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(&bytes)?;
    Ok(path)
}

/// Extract a gzipped tarball into `dest`
///
/// Entries that would escape `dest` are rejected.
pub fn unpack_archive<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    std::fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(CoreError::Archive {
                message: format!("refusing to extract {}", path.display()),
            });
        }
        entry.unpack_in(dest)?;
    }

    Ok(())
}

/// Read a single file from an in-memory archive
pub fn read_file_from_archive(bytes: &[u8], file_path: &str) -> Result<Vec<u8>> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        if path == file_path {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }

    Err(CoreError::Archive {
        message: format!("File not found in archive: {}", file_path),
    })
}

/// Add bytes to a tar archive with a given path
fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0); // Reproducible builds: use epoch time
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

/// Default archive filename for a chart
#[must_use]
pub fn default_archive_name(chart: &LoadedChart) -> String {
    format!("{}-{}.tgz", chart.name(), chart.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{MANIFEST_FILE, TEMPLATES_DIR};
    use tempfile::TempDir;

    fn create_test_chart(dir: &Path) {
        std::fs::write(
            dir.join(MANIFEST_FILE),
            "apiVersion: charter/v1\nname: testchart\nversion: 1.0.0\n",
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "replicas: 3\n").unwrap();
        let templates = dir.join(TEMPLATES_DIR);
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\n",
        )
        .unwrap();
    }

    #[test]
    fn test_pack_and_unpack() {
        let temp = TempDir::new().unwrap();
        let chart_dir = temp.path().join("chart");
        std::fs::create_dir_all(&chart_dir).unwrap();
        create_test_chart(&chart_dir);

        let bytes = pack_directory(&chart_dir).unwrap();
        let dest = temp.path().join("out");
        unpack_archive(bytes.as_slice(), &dest).unwrap();

        assert!(dest.join(MANIFEST_FILE).exists());
        assert!(dest.join("templates/deployment.yaml").exists());
        assert_eq!(
            std::fs::read_to_string(dest.join("values.yaml")).unwrap(),
            "replicas: 3\n"
        );
    }

    #[test]
    fn test_packing_is_reproducible() {
        let temp = TempDir::new().unwrap();
        create_test_chart(temp.path());

        assert_eq!(
            pack_directory(temp.path()).unwrap(),
            pack_directory(temp.path()).unwrap()
        );
    }

    #[test]
    fn test_read_file_from_archive() {
        let temp = TempDir::new().unwrap();
        create_test_chart(temp.path());
        let bytes = pack_directory(temp.path()).unwrap();

        let values = read_file_from_archive(&bytes, "values.yaml").unwrap();
        assert_eq!(values, b"replicas: 3\n");
        assert!(read_file_from_archive(&bytes, "missing.yaml").is_err());
    }

    #[test]
    fn test_write_chart_archive() {
        let temp = TempDir::new().unwrap();
        let chart_dir = temp.path().join("chart");
        std::fs::create_dir_all(&chart_dir).unwrap();
        create_test_chart(&chart_dir);

        let chart = LoadedChart::load(&chart_dir).unwrap();
        let path = write_chart_archive(&chart, &temp.path().join("dist")).unwrap();
        assert!(path.ends_with("testchart-1.0.0.tgz"));
        assert!(path.exists());
    }
}
