//! Filesystem-backed [`ExtensionStore`].
//!
//! Layout of the extensions directory:
//!
//! ```text
//! <extensions_dir>/
//!   .uninstalled.toml          soft-deleted keys
//!   acme.linter-1.2.0/
//!     extension.toml
//!     .metadata.toml           catalog linkage and install flags
//!     ...
//! ```
//!
//! All filesystem work runs on the blocking pool.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ext_core::{
    CancellationToken, ExtensionKind, ExtensionStore, IdentifierWithVersion, LocalExtension,
    MANIFEST_FILENAME, Manifest, Metadata, ScanFilter,
};
use semver::Version;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::UninstalledLedger;
use crate::{Error, Result, archive, blocking};

/// File holding [`Metadata`] inside an extension directory.
pub const METADATA_FILENAME: &str = ".metadata.toml";

const STAGING_PREFIX: &str = ".staging-";

/// Stores user extensions under one directory, optionally reading
/// read-only system extensions from a second one.
#[derive(Debug, Clone)]
pub struct FsExtensionStore {
    inner: Arc<Layout>,
}

#[derive(Debug)]
struct Layout {
    extensions_dir: PathBuf,
    system_dir: Option<PathBuf>,
    ledger: UninstalledLedger,
}

impl FsExtensionStore {
    pub fn new(extensions_dir: impl Into<PathBuf>) -> Self {
        Self::with_system_dir(extensions_dir, None)
    }

    pub fn with_system_dir(extensions_dir: impl Into<PathBuf>, system_dir: Option<PathBuf>) -> Self {
        let extensions_dir = extensions_dir.into();
        let ledger = UninstalledLedger::new(&extensions_dir);
        Self {
            inner: Arc::new(Layout {
                extensions_dir,
                system_dir,
                ledger,
            }),
        }
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.inner.extensions_dir
    }

    /// Directory an extension version is installed into.
    pub fn location(&self, id: &IdentifierWithVersion) -> PathBuf {
        self.inner.location(id)
    }

    async fn run<T, F>(&self, work: F) -> ext_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Layout) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        Ok(blocking(move || work(&inner)).await?)
    }
}

impl Layout {
    fn location(&self, id: &IdentifierWithVersion) -> PathBuf {
        self.extensions_dir.join(id.key())
    }

    fn scan(&self, filter: ScanFilter) -> Result<Vec<LocalExtension>> {
        let mut found = Vec::new();
        if filter.accepts(ExtensionKind::System) {
            if let Some(dir) = &self.system_dir {
                found.extend(read_extensions(dir, ExtensionKind::System)?);
            }
        }
        if filter.accepts(ExtensionKind::User) {
            let uninstalled = self.ledger.keys()?;
            found.extend(
                read_extensions(&self.extensions_dir, ExtensionKind::User)?
                    .into_iter()
                    .filter(|local| !uninstalled.contains(&local.identifier_with_version().key())),
            );
        }
        if !filter.include_outdated {
            retain_newest(&mut found);
        }
        Ok(found)
    }

    fn scan_uninstalled(&self) -> Result<Vec<LocalExtension>> {
        let uninstalled = self.ledger.keys()?;
        Ok(read_extensions(&self.extensions_dir, ExtensionKind::User)?
            .into_iter()
            .filter(|local| uninstalled.contains(&local.identifier_with_version().key()))
            .collect())
    }

    fn set_installed(&self, id: &IdentifierWithVersion) -> Result<Option<LocalExtension>> {
        self.ledger.remove(&id.key())?;
        let location = self.location(id);
        if !location.join(MANIFEST_FILENAME).is_file() {
            debug!("No files left for soft-deleted '{}'", id);
            return Ok(None);
        }
        let local = load_extension(&location, ExtensionKind::User)?;
        debug!("Reactivated '{}'", id);
        Ok(Some(local))
    }

    fn remove(&self, location: &Path) -> Result<()> {
        match fs::remove_dir_all(location) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(location, e)),
        }
    }

    fn extract(
        &self,
        id: &IdentifierWithVersion,
        archive_path: &Path,
        token: &CancellationToken,
    ) -> Result<LocalExtension> {
        let staging = self
            .extensions_dir
            .join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        let target = self.location(id);

        let staged = self.stage(id, archive_path, &staging, &target, token);
        if staged.is_err() {
            if let Err(e) = self.remove(&staging) {
                warn!("Failed to remove staging directory {}: {}", staging.display(), e);
            }
        }
        staged?;

        debug!("Extracted '{}' into {}", id, target.display());
        load_extension(&target, ExtensionKind::User)
    }

    fn stage(
        &self,
        id: &IdentifierWithVersion,
        archive_path: &Path,
        staging: &Path,
        target: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        archive::unpack(archive_path, staging, token)?;

        let manifest_path = staging.join(MANIFEST_FILENAME);
        let manifest = Manifest::from_path(&manifest_path).map_err(|e| Error::Manifest {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !manifest.identifier().is_same(&id.identifier) || manifest.version != id.version {
            return Err(Error::Manifest {
                path: archive_path.to_path_buf(),
                reason: format!(
                    "expected '{}' but the archive contains '{}'",
                    id,
                    manifest.identifier_with_version()
                ),
            });
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled(target.to_path_buf()));
        }

        self.remove(target)?;
        fs::rename(staging, target).map_err(|e| Error::io(target, e))
    }

    fn clean_up(&self) -> Result<()> {
        let uninstalled = self.ledger.keys()?;
        let (deleted, visible): (Vec<_>, Vec<_>) =
            read_extensions(&self.extensions_dir, ExtensionKind::User)?
                .into_iter()
                .partition(|local| uninstalled.contains(&local.identifier_with_version().key()));

        for local in &deleted {
            self.remove(&local.location)?;
            self.ledger.remove(&local.identifier_with_version().key())?;
            info!("Removed uninstalled '{}'", local.identifier_with_version());
        }

        let mut newest = visible.clone();
        retain_newest(&mut newest);
        let keep: HashSet<PathBuf> = newest.into_iter().map(|local| local.location).collect();
        for local in visible.iter().filter(|local| !keep.contains(&local.location)) {
            self.remove(&local.location)?;
            info!("Removed outdated '{}'", local.identifier_with_version());
        }

        self.clean_stale_records(&uninstalled)?;
        self.clean_staging()
    }

    /// Forget ledger keys whose files are already gone.
    fn clean_stale_records(&self, uninstalled: &BTreeSet<String>) -> Result<()> {
        for key in uninstalled {
            if !self.extensions_dir.join(key).exists() {
                self.ledger.remove(key)?;
            }
        }
        Ok(())
    }

    fn clean_staging(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.extensions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(&self.extensions_dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.extensions_dir, e))?;
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                self.remove(&entry.path())?;
            }
        }
        Ok(())
    }
}

/// Keep only the newest version of each identifier.
fn retain_newest(extensions: &mut Vec<LocalExtension>) {
    let newest = extensions
        .iter()
        .fold(HashMap::<String, Version>::new(), |mut newest, local| {
            let entry = newest
                .entry(local.identifier.key())
                .or_insert_with(|| local.version().clone());
            if local.version() > entry {
                *entry = local.version().clone();
            }
            newest
        });
    extensions.retain(|local| newest.get(&local.identifier.key()) == Some(local.version()));
}

/// Every loadable extension directly under `root`, sorted by id then
/// version. Unreadable entries are skipped.
fn read_extensions(root: &Path, kind: ExtensionKind) -> Result<Vec<LocalExtension>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(root, e)),
    };

    let mut extensions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') || !path.is_dir() {
            continue;
        }
        match load_extension(&path, kind) {
            Ok(local) => extensions.push(local),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    extensions.sort_by(|a, b| {
        a.identifier
            .key()
            .cmp(&b.identifier.key())
            .then_with(|| a.version().cmp(b.version()))
    });
    Ok(extensions)
}

fn load_extension(location: &Path, kind: ExtensionKind) -> Result<LocalExtension> {
    let manifest_path = location.join(MANIFEST_FILENAME);
    let manifest = Manifest::from_path(&manifest_path).map_err(|e| Error::Manifest {
        path: manifest_path,
        reason: e.to_string(),
    })?;
    let metadata = read_metadata(location)?;

    let mut identifier = manifest.identifier();
    identifier.uuid.clone_from(&metadata.uuid);
    Ok(LocalExtension {
        identifier,
        kind,
        manifest,
        location: location.to_path_buf(),
        metadata,
    })
}

fn read_metadata(location: &Path) -> Result<Metadata> {
    let path = location.join(METADATA_FILENAME);
    match ext_fs::io::read_text_locked(&path)? {
        Some(content) => toml::from_str(&content).map_err(|e| Error::Parse {
            path,
            message: e.to_string(),
        }),
        None => Ok(Metadata::default()),
    }
}

fn write_metadata(location: &Path, metadata: &Metadata) -> Result<()> {
    let path = location.join(METADATA_FILENAME);
    let content = toml::to_string_pretty(metadata).map_err(|e| Error::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    ext_fs::io::write_text(&path, &content)?;
    Ok(())
}

#[async_trait]
impl ExtensionStore for FsExtensionStore {
    async fn scan(&self, filter: ScanFilter) -> ext_core::Result<Vec<LocalExtension>> {
        self.run(move |layout| layout.scan(filter)).await
    }

    async fn scan_uninstalled(&self) -> ext_core::Result<Vec<LocalExtension>> {
        self.run(|layout| layout.scan_uninstalled()).await
    }

    async fn set_uninstalled(&self, extensions: &[LocalExtension]) -> ext_core::Result<()> {
        let keys: Vec<String> = extensions
            .iter()
            .filter(|local| local.kind == ExtensionKind::User)
            .map(|local| local.identifier_with_version().key())
            .collect();
        self.run(move |layout| layout.ledger.insert(keys)).await
    }

    async fn set_installed(
        &self,
        id: &IdentifierWithVersion,
    ) -> ext_core::Result<Option<LocalExtension>> {
        let id = id.clone();
        self.run(move |layout| layout.set_installed(&id)).await
    }

    async fn remove(&self, extension: &LocalExtension) -> ext_core::Result<()> {
        let location = extension.location.clone();
        self.run(move |layout| layout.remove(&location)).await
    }

    async fn remove_uninstalled(&self, extension: &LocalExtension) -> ext_core::Result<()> {
        let location = extension.location.clone();
        let key = extension.identifier_with_version().key();
        self.run(move |layout| {
            layout.remove(&location)?;
            layout.ledger.remove(&key)?;
            Ok(())
        })
        .await
    }

    async fn extract(
        &self,
        id: &IdentifierWithVersion,
        archive: &Path,
        token: &CancellationToken,
    ) -> ext_core::Result<LocalExtension> {
        let (owned_id, archive, token) = (id.clone(), archive.to_path_buf(), token.clone());
        self.run(move |layout| layout.extract(&owned_id, &archive, &token))
            .await
            .map_err(|e| match e {
                ext_core::Error::Cancelled(_) => ext_core::Error::Cancelled(id.id().to_string()),
                other => other,
            })
    }

    async fn save_metadata(
        &self,
        extension: &LocalExtension,
        metadata: &Metadata,
    ) -> ext_core::Result<LocalExtension> {
        let mut local = extension.clone();
        let metadata = metadata.clone();
        self.run(move |_| {
            write_metadata(&local.location, &metadata)?;
            local.identifier.uuid.clone_from(&metadata.uuid);
            local.metadata = metadata;
            Ok(local)
        })
        .await
    }

    async fn uninstalled_records(&self) -> ext_core::Result<HashSet<String>> {
        self.run(|layout| Ok(layout.ledger.keys()?.into_iter().collect()))
            .await
    }

    async fn read_manifest(&self, archive: &Path) -> ext_core::Result<Manifest> {
        let archive = archive.to_path_buf();
        self.run(move |_| archive::read_manifest(&archive)).await
    }

    async fn exists(&self, extension: &LocalExtension) -> ext_core::Result<bool> {
        let manifest = extension.location.join(MANIFEST_FILENAME);
        self.run(move |_| Ok(manifest.is_file())).await
    }

    async fn clean_up(&self) -> ext_core::Result<()> {
        self.run(|layout| layout.clean_up()).await
    }
}
