//! Traits for the systems the orchestrator drives: the on-disk store, the
//! catalog and the archive downloader.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use semver::Version;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::identifier::{ExtensionIdentifier, IdentifierWithVersion};
use crate::manifest::Manifest;
use crate::model::{GalleryExtension, InstallOperation, LocalExtension, Metadata, ScanFilter, StatisticKind};

/// Persistent extension storage.
#[async_trait]
pub trait ExtensionStore: Send + Sync {
    /// Installed extensions matching `filter`. Soft-deleted extensions are
    /// never returned.
    async fn scan(&self, filter: ScanFilter) -> Result<Vec<LocalExtension>>;

    /// Installed extensions that are soft-deleted and awaiting removal.
    async fn scan_uninstalled(&self) -> Result<Vec<LocalExtension>>;

    /// Soft-delete: hide the extensions from scans, keeping their files.
    async fn set_uninstalled(&self, extensions: &[LocalExtension]) -> Result<()>;

    /// Reactivate a soft-deleted version. The soft-deleted record is
    /// dropped either way; returns `None` when no copy of that version is on
    /// disk.
    async fn set_installed(&self, id: &IdentifierWithVersion) -> Result<Option<LocalExtension>>;

    /// Delete the files of an extension.
    async fn remove(&self, extension: &LocalExtension) -> Result<()>;

    /// Delete the files of an extension and forget its soft-deleted record.
    async fn remove_uninstalled(&self, extension: &LocalExtension) -> Result<()>;

    /// Unpack `archive` into the store.
    async fn extract(
        &self,
        id: &IdentifierWithVersion,
        archive: &Path,
        token: &CancellationToken,
    ) -> Result<LocalExtension>;

    /// Persist metadata for an installed extension, replacing what was there.
    async fn save_metadata(
        &self,
        extension: &LocalExtension,
        metadata: &Metadata,
    ) -> Result<LocalExtension>;

    /// Keys ([`IdentifierWithVersion::key`]) of soft-deleted versions.
    async fn uninstalled_records(&self) -> Result<HashSet<String>>;

    async fn read_manifest(&self, archive: &Path) -> Result<Manifest>;

    /// Whether the files of an extension are still on disk.
    async fn exists(&self, extension: &LocalExtension) -> Result<bool>;

    /// Delete soft-deleted and superseded copies.
    async fn clean_up(&self) -> Result<()>;
}

/// A catalog query by names and/or catalog ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    pub names: Vec<String>,
    pub uuids: Vec<String>,
    pub page_size: usize,
}

impl CatalogQuery {
    pub fn by_names(names: Vec<String>) -> Self {
        let page_size = names.len();
        Self {
            names,
            uuids: Vec::new(),
            page_size,
        }
    }

    pub fn by_identifier(identifier: &ExtensionIdentifier) -> Self {
        match &identifier.uuid {
            Some(uuid) => Self {
                names: Vec::new(),
                uuids: vec![uuid.clone()],
                page_size: 1,
            },
            None => Self::by_names(vec![identifier.id.clone()]),
        }
    }
}

/// The source of installable extensions.
#[async_trait]
pub trait Catalog: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Latest entry for each matching extension, at most `page_size`.
    async fn query(&self, query: &CatalogQuery) -> Result<Vec<GalleryExtension>>;

    async fn manifest(&self, extension: &GalleryExtension) -> Result<Option<Manifest>>;

    /// The newest version of `extension` that runs on the current host.
    async fn compatible_version(&self, extension: &GalleryExtension) -> Result<Option<GalleryExtension>>;

    /// Extensions reported as problematic.
    async fn malicious_extensions(&self) -> Result<Vec<ExtensionIdentifier>>;

    async fn report_statistic(
        &self,
        publisher: &str,
        name: &str,
        version: &Version,
        kind: StatisticKind,
    ) -> Result<()>;
}

/// Fetches archives of catalog entries to local files.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, extension: &GalleryExtension, operation: InstallOperation) -> Result<PathBuf>;

    async fn delete(&self, archive: &Path) -> Result<()>;
}
