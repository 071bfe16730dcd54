//! Fetches catalog archives into a local cache directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ext_core::{Downloader, GalleryExtension, InstallOperation};
use ext_fs::checksum;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result, blocking};

/// Copies archives referenced by catalog assets into `cache_dir`, each
/// under a fresh name, and verifies published checksums.
#[derive(Debug, Clone)]
pub struct DirectoryDownloader {
    cache_dir: PathBuf,
}

impl DirectoryDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

fn fetch(source: &Path, cache_dir: &Path, sha256: Option<&str>) -> Result<PathBuf> {
    fs::create_dir_all(cache_dir).map_err(|e| Error::io(cache_dir, e))?;
    let dest = cache_dir.join(format!("{}.tar.gz", Uuid::new_v4()));
    fs::copy(source, &dest).map_err(|e| Error::io(source, e))?;

    if let Some(expected) = sha256 {
        let actual = checksum::compute_file_checksum(&dest).map_err(|e| Error::io(&dest, e))?;
        if !checksum::matches(expected, &actual) {
            if let Err(e) = fs::remove_file(&dest) {
                warn!("Failed to remove corrupt download {}: {}", dest.display(), e);
            }
            return Err(Error::ChecksumMismatch {
                path: source.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(dest)
}

#[async_trait]
impl Downloader for DirectoryDownloader {
    async fn download(
        &self,
        extension: &GalleryExtension,
        operation: InstallOperation,
    ) -> ext_core::Result<PathBuf> {
        debug!(
            "Downloading '{}' for {:?}",
            extension.identifier_with_version(),
            operation
        );
        let source = PathBuf::from(&extension.asset);
        let cache_dir = self.cache_dir.clone();
        let sha256 = extension.sha256.clone();
        blocking(move || fetch(&source, &cache_dir, sha256.as_deref()))
            .await
            .map_err(|e| ext_core::Error::download(&extension.identifier.id, e))
    }

    /// Delete a downloaded archive. Paths outside the cache are left alone.
    async fn delete(&self, archive: &Path) -> ext_core::Result<()> {
        if !archive.starts_with(&self.cache_dir) {
            debug!("Not deleting {} outside the download cache", archive.display());
            return Ok(());
        }
        let archive = archive.to_path_buf();
        blocking(move || match fs::remove_file(&archive) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&archive, e)),
        })
        .await?;
        Ok(())
    }
}
