//! In-memory collaborators for exercising the orchestrator without a disk.
//!
//! "Archives" are paths registered in a shared [`Archives`] map; extracting
//! one records an installed extension in [`MemoryStore`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ext_core::{
    CancellationToken, Catalog, CatalogQuery, Downloader, Error, ExtensionEvent, ExtensionIdentifier,
    ExtensionKind, ExtensionManagementService, ExtensionStore, GalleryExtension, IdentifierWithVersion,
    InstallOperation, LocalExtension, ManagerConfig, Manifest, Metadata, Result, ScanFilter,
    StatisticKind,
};
use semver::Version;
use tokio::sync::broadcast;

/// Archive path to the manifest it contains.
#[derive(Default)]
pub struct Archives(Mutex<HashMap<PathBuf, Manifest>>);

impl Archives {
    pub fn add(&self, manifest: &Manifest) -> PathBuf {
        let path = PathBuf::from(format!("/archives/{}-{}.tar.gz", manifest.id(), manifest.version));
        self.0.lock().unwrap().insert(path.clone(), manifest.clone());
        path
    }

    fn get(&self, path: &Path) -> Option<Manifest> {
        self.0.lock().unwrap().get(path).cloned()
    }
}

#[derive(Default)]
struct StoreState {
    /// Everything on disk, soft-deleted or not.
    extensions: Vec<LocalExtension>,
    uninstalled: HashSet<String>,
}

pub struct MemoryStore {
    archives: Arc<Archives>,
    state: Mutex<StoreState>,
    extractions: Mutex<Vec<String>>,
    extract_delay: Mutex<Duration>,
    uninstall_delay: Mutex<Duration>,
    failing_extractions: Mutex<HashSet<String>>,
    failing_removals: Mutex<HashSet<String>>,
    failing_soft_deletes: Mutex<HashSet<String>>,
    lost_files: Mutex<HashSet<String>>,
    set_uninstalled_calls: Mutex<Vec<String>>,
    pub extract_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new(archives: Arc<Archives>) -> Self {
        Self {
            archives,
            state: Mutex::new(StoreState::default()),
            extractions: Mutex::new(Vec::new()),
            extract_delay: Mutex::new(Duration::ZERO),
            uninstall_delay: Mutex::new(Duration::ZERO),
            failing_extractions: Mutex::new(HashSet::new()),
            failing_removals: Mutex::new(HashSet::new()),
            failing_soft_deletes: Mutex::new(HashSet::new()),
            lost_files: Mutex::new(HashSet::new()),
            set_uninstalled_calls: Mutex::new(Vec::new()),
            extract_count: AtomicUsize::new(0),
        }
    }

    pub fn set_extract_delay(&self, delay: Duration) {
        *self.extract_delay.lock().unwrap() = delay;
    }

    pub fn set_uninstall_delay(&self, delay: Duration) {
        *self.uninstall_delay.lock().unwrap() = delay;
    }

    pub fn fail_extraction_of(&self, id: &str) {
        self.failing_extractions.lock().unwrap().insert(id.to_lowercase());
    }

    pub fn fail_removal_of(&self, id: &str) {
        self.failing_removals.lock().unwrap().insert(id.to_lowercase());
    }

    pub fn fail_soft_delete_of(&self, id: &str) {
        self.failing_soft_deletes.lock().unwrap().insert(id.to_lowercase());
    }

    /// Keep listing an extension in scans but report its files as gone.
    pub fn lose_files_of(&self, id: &str) {
        self.lost_files.lock().unwrap().insert(id.to_lowercase());
    }

    /// Record a version as soft-deleted without putting anything on disk.
    pub fn record_soft_deleted(&self, id: &str, version: &str) {
        let key = format!("{}-{}", id.to_lowercase(), version);
        self.state.lock().unwrap().uninstalled.insert(key);
    }

    /// Put an extension on disk as if installed earlier.
    pub fn preinstall(&self, manifest: Manifest, metadata: Metadata) -> LocalExtension {
        let local = local_from(&manifest, ExtensionKind::User, metadata);
        self.state.lock().unwrap().extensions.push(local.clone());
        local
    }

    /// Ids in extraction order.
    pub fn extractions(&self) -> Vec<String> {
        self.extractions.lock().unwrap().clone()
    }

    /// Ids passed to `set_uninstalled`, one entry per extension per call.
    pub fn set_uninstalled_calls(&self) -> Vec<String> {
        self.set_uninstalled_calls.lock().unwrap().clone()
    }

    pub fn is_soft_deleted(&self, id: &str, version: &str) -> bool {
        let key = format!("{}-{}", id.to_lowercase(), version);
        self.state.lock().unwrap().uninstalled.contains(&key)
    }

    pub fn on_disk(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .extensions
            .iter()
            .map(|local| local.identifier_with_version().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Visible user extensions as sorted `id@version` strings.
    pub async fn visible(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .scan(ScanFilter::user())
            .await
            .unwrap()
            .iter()
            .map(|local| local.identifier_with_version().to_string())
            .collect();
        ids.sort();
        ids
    }
}

fn local_from(manifest: &Manifest, kind: ExtensionKind, metadata: Metadata) -> LocalExtension {
    let identifier = match &metadata.uuid {
        Some(uuid) => manifest.identifier().with_uuid(uuid),
        None => manifest.identifier(),
    };
    LocalExtension {
        identifier,
        kind,
        location: PathBuf::from(format!("/extensions/{}-{}", manifest.id(), manifest.version)),
        manifest: manifest.clone(),
        metadata,
    }
}

fn same_version(a: &LocalExtension, b: &LocalExtension) -> bool {
    a.identifier.is_same(&b.identifier) && a.version() == b.version()
}

#[async_trait]
impl ExtensionStore for MemoryStore {
    async fn scan(&self, filter: ScanFilter) -> Result<Vec<LocalExtension>> {
        let state = self.state.lock().unwrap();
        let mut visible: Vec<LocalExtension> = state
            .extensions
            .iter()
            .filter(|local| filter.accepts(local.kind))
            .filter(|local| !state.uninstalled.contains(&local.identifier_with_version().key()))
            .cloned()
            .collect();
        if !filter.include_outdated {
            let newest: HashMap<String, Version> =
                visible.iter().fold(HashMap::new(), |mut newest, local| {
                    let entry = newest.entry(local.identifier.key()).or_insert_with(|| local.version().clone());
                    if local.version() > entry {
                        *entry = local.version().clone();
                    }
                    newest
                });
            visible.retain(|local| newest.get(&local.identifier.key()) == Some(local.version()));
        }
        Ok(visible)
    }

    async fn scan_uninstalled(&self) -> Result<Vec<LocalExtension>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .extensions
            .iter()
            .filter(|local| state.uninstalled.contains(&local.identifier_with_version().key()))
            .cloned()
            .collect())
    }

    async fn set_uninstalled(&self, extensions: &[LocalExtension]) -> Result<()> {
        let delay = *self.uninstall_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_soft_deletes.lock().unwrap();
        if let Some(local) = extensions.iter().find(|l| failing.contains(&l.identifier.key())) {
            return Err(Error::local(format!("ledger is read-only, cannot hide '{}'", local.identifier)));
        }
        let mut state = self.state.lock().unwrap();
        let mut calls = self.set_uninstalled_calls.lock().unwrap();
        for local in extensions {
            state.uninstalled.insert(local.identifier_with_version().key());
            calls.push(local.identifier.id.clone());
        }
        Ok(())
    }

    async fn set_installed(&self, id: &IdentifierWithVersion) -> Result<Option<LocalExtension>> {
        let mut state = self.state.lock().unwrap();
        state.uninstalled.remove(&id.key());
        Ok(state
            .extensions
            .iter()
            .find(|local| local.identifier_with_version().key() == id.key())
            .cloned())
    }

    async fn remove(&self, extension: &LocalExtension) -> Result<()> {
        if self.failing_removals.lock().unwrap().contains(&extension.identifier.key()) {
            return Err(Error::local(format!("files of '{}' are in use", extension.identifier)));
        }
        self.state
            .lock()
            .unwrap()
            .extensions
            .retain(|local| !same_version(local, extension));
        Ok(())
    }

    async fn remove_uninstalled(&self, extension: &LocalExtension) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.extensions.retain(|local| !same_version(local, extension));
        state.uninstalled.remove(&extension.identifier_with_version().key());
        Ok(())
    }

    async fn extract(
        &self,
        id: &IdentifierWithVersion,
        archive: &Path,
        token: &CancellationToken,
    ) -> Result<LocalExtension> {
        self.extract_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.extract_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled(id.id().to_string()));
        }
        if self.failing_extractions.lock().unwrap().contains(&id.identifier.key()) {
            return Err(Error::local(format!("disk full while extracting '{}'", id)));
        }
        let manifest = self
            .archives
            .get(archive)
            .ok_or_else(|| Error::local(format!("no archive at {}", archive.display())))?;

        let local = local_from(&manifest, ExtensionKind::User, Metadata::default());
        let mut state = self.state.lock().unwrap();
        state.extensions.retain(|existing| !same_version(existing, &local));
        state.extensions.push(local.clone());
        self.extractions.lock().unwrap().push(id.id().to_string());
        Ok(local)
    }

    async fn save_metadata(&self, extension: &LocalExtension, metadata: &Metadata) -> Result<LocalExtension> {
        let mut state = self.state.lock().unwrap();
        let local = state
            .extensions
            .iter_mut()
            .find(|local| same_version(local, extension))
            .ok_or_else(|| Error::NotFound(extension.identifier.id.clone()))?;
        local.metadata = metadata.clone();
        if let Some(uuid) = &metadata.uuid {
            local.identifier.uuid = Some(uuid.clone());
        }
        Ok(local.clone())
    }

    async fn uninstalled_records(&self) -> Result<HashSet<String>> {
        Ok(self.state.lock().unwrap().uninstalled.clone())
    }

    async fn read_manifest(&self, archive: &Path) -> Result<Manifest> {
        self.archives
            .get(archive)
            .ok_or_else(|| Error::validation(archive.display().to_string(), "not an extension archive"))
    }

    async fn exists(&self, extension: &LocalExtension) -> Result<bool> {
        if self.lost_files.lock().unwrap().contains(&extension.identifier.key()) {
            return Ok(false);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .extensions
            .iter()
            .any(|local| same_version(local, extension)))
    }

    async fn clean_up(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let uninstalled = std::mem::take(&mut state.uninstalled);
        state
            .extensions
            .retain(|local| !uninstalled.contains(&local.identifier_with_version().key()));
        Ok(())
    }
}

pub struct MemoryCatalog {
    archives: Arc<Archives>,
    host_version: Version,
    enabled: bool,
    entries: Mutex<Vec<(GalleryExtension, Manifest)>>,
    malicious: Mutex<Vec<ExtensionIdentifier>>,
    statistics: Mutex<Vec<(String, StatisticKind)>>,
    pub malicious_queries: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new(archives: Arc<Archives>, enabled: bool) -> Self {
        Self {
            archives,
            host_version: ManagerConfig::default().host_version,
            enabled,
            entries: Mutex::new(Vec::new()),
            malicious: Mutex::new(Vec::new()),
            statistics: Mutex::new(Vec::new()),
            malicious_queries: AtomicUsize::new(0),
        }
    }

    /// Publish a manifest and return its catalog entry.
    pub fn publish(&self, manifest: &Manifest) -> GalleryExtension {
        let asset = self.archives.add(manifest);
        let gallery = GalleryExtension {
            identifier: manifest.identifier().with_uuid(format!("uuid-{}", manifest.id())),
            version: manifest.version.clone(),
            publisher_display_name: Some(manifest.publisher.to_uppercase()),
            asset: asset.display().to_string(),
            engine: manifest.engine.clone(),
            sha256: None,
        };
        self.entries.lock().unwrap().push((gallery.clone(), manifest.clone()));
        gallery
    }

    pub fn report_malicious(&self, id: &str) {
        self.malicious.lock().unwrap().push(ExtensionIdentifier::new(id));
    }

    pub fn statistics(&self) -> Vec<(String, StatisticKind)> {
        self.statistics.lock().unwrap().clone()
    }

    /// Newest entry per identifier.
    fn latest(&self, matches: impl Fn(&GalleryExtension) -> bool) -> Vec<GalleryExtension> {
        let entries = self.entries.lock().unwrap();
        let mut latest: Vec<GalleryExtension> = Vec::new();
        for (gallery, _) in entries.iter().filter(|(g, _)| matches(g)) {
            match latest.iter_mut().find(|l| l.identifier.is_same(&gallery.identifier)) {
                Some(existing) if existing.version < gallery.version => *existing = gallery.clone(),
                Some(_) => {}
                None => latest.push(gallery.clone()),
            }
        }
        latest
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn query(&self, query: &CatalogQuery) -> Result<Vec<GalleryExtension>> {
        let mut found = self.latest(|gallery| {
            query.names.iter().any(|name| gallery.identifier.matches_id(name))
                || gallery
                    .identifier
                    .uuid
                    .as_ref()
                    .is_some_and(|uuid| query.uuids.contains(uuid))
        });
        found.truncate(query.page_size);
        Ok(found)
    }

    async fn manifest(&self, extension: &GalleryExtension) -> Result<Option<Manifest>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|(g, _)| g.identifier.is_same(&extension.identifier) && g.version == extension.version)
            .map(|(_, manifest)| manifest.clone()))
    }

    async fn compatible_version(&self, extension: &GalleryExtension) -> Result<Option<GalleryExtension>> {
        let entries = self.entries.lock().unwrap();
        let mut candidates: Vec<&(GalleryExtension, Manifest)> = entries
            .iter()
            .filter(|(g, _)| g.identifier.is_same(&extension.identifier))
            .filter(|(_, m)| m.is_engine_compatible(&self.host_version).unwrap_or(false))
            .collect();
        candidates.sort_by(|a, b| b.0.version.cmp(&a.0.version));
        Ok(candidates.first().map(|(g, _)| g.clone()))
    }

    async fn malicious_extensions(&self) -> Result<Vec<ExtensionIdentifier>> {
        self.malicious_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.malicious.lock().unwrap().clone())
    }

    async fn report_statistic(
        &self,
        publisher: &str,
        name: &str,
        _version: &Version,
        kind: StatisticKind,
    ) -> Result<()> {
        self.statistics
            .lock()
            .unwrap()
            .push((format!("{publisher}.{name}"), kind));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDownloader {
    failing: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<PathBuf>>,
}

impl MemoryDownloader {
    pub fn fail_download_of(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_lowercase());
    }

    pub fn deleted(&self) -> Vec<PathBuf> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for MemoryDownloader {
    async fn download(&self, extension: &GalleryExtension, _operation: InstallOperation) -> Result<PathBuf> {
        if self.failing.lock().unwrap().contains(&extension.identifier.key()) {
            return Err(Error::download(&extension.identifier.id, "connection reset"));
        }
        Ok(PathBuf::from(&extension.asset))
    }

    async fn delete(&self, archive: &Path) -> Result<()> {
        self.deleted.lock().unwrap().push(archive.to_path_buf());
        Ok(())
    }
}

/// A service wired to in-memory collaborators.
pub struct Harness {
    pub archives: Arc<Archives>,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub downloader: Arc<MemoryDownloader>,
    pub service: ExtensionManagementService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_catalog_enabled(true)
    }

    pub fn with_catalog_enabled(enabled: bool) -> Self {
        let archives = Arc::new(Archives::default());
        let store = Arc::new(MemoryStore::new(Arc::clone(&archives)));
        let catalog = Arc::new(MemoryCatalog::new(Arc::clone(&archives), enabled));
        let downloader = Arc::new(MemoryDownloader::default());
        let service = ExtensionManagementService::new(
            store.clone(),
            catalog.clone(),
            downloader.clone(),
            ManagerConfig::default(),
        );
        Self {
            archives,
            store,
            catalog,
            downloader,
            service,
        }
    }
}

pub fn manifest(name: &str, version: &str) -> Manifest {
    Manifest::new("acme", name, Version::parse(version).unwrap())
}

/// Drain the events received so far.
pub fn drain_events(receiver: &mut broadcast::Receiver<ExtensionEvent>) -> Vec<ExtensionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
