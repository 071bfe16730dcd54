//! The public entry point tying the collaborators together.

use std::path::Path;
use std::slice;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::collaborators::{Catalog, CatalogQuery, Downloader, ExtensionStore};
use crate::config::ManagerConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::{EVENT_CAPACITY, ExtensionEvent};
use crate::identifier::ExtensionIdentifier;
use crate::manifest::Manifest;
use crate::model::{
    GalleryExtension, InstallOptions, LocalExtension, Metadata, ScanFilter, UninstallOptions,
};
use crate::task::InstallTask;
use crate::{resolver, scheduler, telemetry, uninstall};

/// Installs, updates and removes extensions.
///
/// Cheap to clone; clones share in-flight state and the event channel.
#[derive(Clone)]
pub struct ExtensionManagementService {
    ctx: Arc<Context>,
}

impl ExtensionManagementService {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        catalog: Arc<dyn Catalog>,
        downloader: Arc<dyn Downloader>,
        config: ManagerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx: Arc::new(Context::new(store, catalog, downloader, config, events)),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.ctx.subscribe()
    }

    pub async fn installed(&self, filter: ScanFilter) -> Result<Vec<LocalExtension>> {
        self.ctx.store.scan(filter).await
    }

    /// Read and validate the manifest inside an archive.
    pub async fn manifest_of_archive(&self, archive: &Path) -> Result<Manifest> {
        self.ctx.store.read_manifest(archive).await.map_err(|e| match e {
            Error::Validation { .. } => e,
            other => Error::validation(archive.display().to_string(), other),
        })
    }

    /// Install an extension from a local archive.
    pub async fn install_archive(&self, archive: &Path, options: InstallOptions) -> Result<LocalExtension> {
        let manifest = self.manifest_of_archive(archive).await?;
        if !manifest.is_engine_compatible(self.ctx.host_version())? {
            return Err(Error::Incompatible {
                extension: manifest.id(),
                host_version: self.ctx.host_version().to_string(),
            });
        }

        let task = InstallTask::from_archive(
            Arc::clone(&self.ctx),
            archive.to_path_buf(),
            manifest,
            options.clone(),
        );
        let result = scheduler::install_batch(&self.ctx, task, &options, false).await?;
        result
            .local
            .ok_or_else(|| Error::Unknown(format!("'{}' finished without an installation", result.identifier)))
    }

    /// Install the host-compatible version of a catalog extension together
    /// with its dependencies and pack members.
    pub async fn install_from_gallery(
        &self,
        gallery: &GalleryExtension,
        options: InstallOptions,
    ) -> Result<LocalExtension> {
        let (compatible, manifest) = match self.gallery_precheck(gallery).await {
            Ok(checked) => checked,
            Err(e) => {
                telemetry::precheck_failed(&gallery.identifier, &e);
                return Err(e);
            }
        };

        let task = InstallTask::from_gallery(Arc::clone(&self.ctx), compatible, manifest, options.clone());
        let result = scheduler::install_batch(&self.ctx, task, &options, true).await?;
        result
            .local
            .ok_or_else(|| Error::Unknown(format!("'{}' finished without an installation", result.identifier)))
    }

    async fn gallery_precheck(&self, gallery: &GalleryExtension) -> Result<(GalleryExtension, Manifest)> {
        if !self.ctx.catalog.is_enabled() {
            return Err(Error::CatalogDisabled);
        }
        let compatible = resolver::check_installable(&self.ctx, gallery).await?;
        let manifest = self.ctx.catalog.manifest(&compatible).await?.ok_or_else(|| {
            Error::validation(&compatible.identifier.id, "the catalog has no manifest for this version")
        })?;
        Ok((compatible, manifest))
    }

    /// Find the catalog entry for an identifier, by uuid when it has one.
    pub async fn find_in_catalog(&self, identifier: &ExtensionIdentifier) -> Result<GalleryExtension> {
        if !self.ctx.catalog.is_enabled() {
            return Err(Error::CatalogDisabled);
        }
        self.ctx
            .catalog
            .query(&CatalogQuery::by_identifier(identifier))
            .await?
            .into_iter()
            .find(|gallery| gallery.identifier.is_same(identifier))
            .ok_or_else(|| Error::NotFound(identifier.id.clone()))
    }

    pub async fn uninstall(&self, identifier: &ExtensionIdentifier, options: UninstallOptions) -> Result<()> {
        uninstall::uninstall(&self.ctx, identifier, options).await
    }

    /// Remove an installed catalog extension and install it again.
    pub async fn reinstall_from_gallery(&self, local: &LocalExtension) -> Result<LocalExtension> {
        let identifier = match &local.metadata.uuid {
            Some(uuid) => local.identifier.clone().with_uuid(uuid),
            None => local.identifier.clone(),
        };
        let gallery = self.find_in_catalog(&identifier).await?;

        self.ctx.store.set_uninstalled(slice::from_ref(local)).await?;
        if let Err(e) = self.ctx.store.remove_uninstalled(local).await {
            warn!("Failed to remove '{}' for reinstall: {}", local.identifier, e);
            return Err(Error::RestartRequired(local.identifier.id.clone()));
        }

        info!("Reinstalling '{}'", local.identifier_with_version());
        self.install_from_gallery(&gallery, InstallOptions::default()).await
    }

    /// Link an installed extension to its catalog entry.
    pub async fn update_metadata(&self, local: &LocalExtension, gallery: &GalleryExtension) -> Result<LocalExtension> {
        let mut metadata = local.metadata.clone();
        metadata.merge(&Metadata::from_gallery(gallery));
        self.ctx.store.save_metadata(local, &metadata).await
    }

    pub async fn update_extension_scope(
        &self,
        local: &LocalExtension,
        is_machine_scoped: bool,
    ) -> Result<LocalExtension> {
        let metadata = Metadata {
            is_machine_scoped,
            ..local.metadata.clone()
        };
        self.ctx.store.save_metadata(local, &metadata).await
    }

    /// Delete soft-deleted and superseded copies from disk.
    pub async fn clean_up(&self) -> Result<()> {
        self.ctx.store.clean_up().await
    }

    /// Cancel every install in flight and forget in-flight removals.
    pub fn shutdown(&self) {
        let tasks = self.ctx.installing.drain();
        if !tasks.is_empty() {
            info!("Cancelling {} install(s) in flight", tasks.len());
        }
        for task in tasks {
            task.cancel();
        }
        self.ctx.uninstalling.clear();
    }

    /// Number of install tasks currently registered as in flight.
    pub fn installs_in_flight(&self) -> usize {
        self.ctx.installing.len()
    }
}
