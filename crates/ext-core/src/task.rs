//! Install tasks.
//!
//! An [`InstallTask`] installs one extension version from the catalog or
//! from a local archive. Its work starts on the first [`InstallTask::run`]
//! and is shared: later `run` calls and [`InstallTask::wait_until_finished`]
//! observe the same outcome. A task moves through
//! `Pending -> Running -> {Finished, Failed, Cancelled}` and is never reused.

use std::path::{Path, PathBuf};
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::collaborators::CatalogQuery;
use crate::context::Context;
use crate::error::{Error, ErrorCode, Result};
use crate::identifier::{ExtensionIdentifier, IdentifierWithVersion};
use crate::manifest::Manifest;
use crate::model::{
    GalleryExtension, InstallOperation, InstallOptions, InstallResult, InstallSource,
    LocalExtension, Metadata, ScanFilter, StatisticKind,
};
use crate::telemetry;

/// Lifecycle of an [`InstallTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

type Outcome = Shared<BoxFuture<'static, Result<LocalExtension>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Installs one extension version.
pub struct InstallTask {
    identifier: ExtensionIdentifier,
    manifest: Manifest,
    source: InstallSource,
    options: InstallOptions,
    ctx: Arc<Context>,
    operation: Mutex<InstallOperation>,
    state: Mutex<TaskState>,
    outcome: Mutex<Option<Outcome>>,
    /// Opened by the first `run` or by `cancel`.
    gate: watch::Sender<bool>,
    token: CancellationToken,
}

impl InstallTask {
    pub(crate) fn from_gallery(
        ctx: Arc<Context>,
        gallery: GalleryExtension,
        manifest: Manifest,
        options: InstallOptions,
    ) -> Arc<Self> {
        Self::new(
            ctx,
            gallery.identifier.clone(),
            manifest,
            InstallSource::Gallery(gallery),
            options,
        )
    }

    pub(crate) fn from_archive(
        ctx: Arc<Context>,
        archive: PathBuf,
        manifest: Manifest,
        options: InstallOptions,
    ) -> Arc<Self> {
        Self::new(
            ctx,
            manifest.identifier(),
            manifest,
            InstallSource::Archive(archive),
            options,
        )
    }

    fn new(
        ctx: Arc<Context>,
        identifier: ExtensionIdentifier,
        manifest: Manifest,
        source: InstallSource,
        options: InstallOptions,
    ) -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            identifier,
            manifest,
            source,
            options,
            ctx,
            operation: Mutex::new(InstallOperation::Install),
            state: Mutex::new(TaskState::Pending),
            outcome: Mutex::new(None),
            gate,
            token: CancellationToken::new(),
        })
    }

    pub fn identifier(&self) -> &ExtensionIdentifier {
        &self.identifier
    }

    pub fn identifier_with_version(&self) -> IdentifierWithVersion {
        let version = match &self.source {
            InstallSource::Gallery(gallery) => gallery.version.clone(),
            InstallSource::Archive(_) => self.manifest.version.clone(),
        };
        IdentifierWithVersion::new(self.identifier.clone(), version)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn source(&self) -> &InstallSource {
        &self.source
    }

    pub fn is_from_gallery(&self) -> bool {
        matches!(self.source, InstallSource::Gallery(_))
    }

    pub fn operation(&self) -> InstallOperation {
        *lock(&self.operation)
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.state)
    }

    /// Start the work if it has not started yet and wait for its outcome.
    pub async fn run(self: &Arc<Self>) -> Result<LocalExtension> {
        let outcome = {
            let mut outcome = lock(&self.outcome);
            outcome
                .get_or_insert_with(|| {
                    *lock(&self.state) = TaskState::Running;
                    Arc::clone(self).execute().boxed().shared()
                })
                .clone()
        };
        self.gate.send_replace(true);
        outcome.await
    }

    /// Wait until the task is started or cancelled, then for its outcome.
    pub async fn wait_until_finished(&self) -> Result<LocalExtension> {
        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(Error::Unknown(format!("task for '{}' was dropped", self.identifier)));
        }
        let outcome = lock(&self.outcome).clone();
        match outcome {
            Some(outcome) => outcome.await,
            None => Err(Error::Cancelled(self.identifier.id.clone())),
        }
    }

    /// Cancel the task. A task that never started settles as cancelled
    /// immediately; a running one stops at its next suspension point.
    pub fn cancel(&self) {
        {
            let mut outcome = lock(&self.outcome);
            if outcome.is_none() {
                *lock(&self.state) = TaskState::Cancelled;
                let cancelled: BoxFuture<'static, Result<LocalExtension>> =
                    future::ready(Err(Error::Cancelled(self.identifier.id.clone()))).boxed();
                *outcome = Some(cancelled.shared());
            }
        }
        self.token.cancel();
        self.gate.send_replace(true);
    }

    /// The result reported to listeners for this task.
    pub(crate) fn result(&self, local: Option<LocalExtension>, error: Option<ErrorCode>) -> InstallResult {
        InstallResult {
            identifier: self.identifier.clone(),
            local,
            operation: if error.is_some() {
                InstallOperation::Install
            } else {
                self.operation()
            },
            source: self.source.clone(),
            error,
        }
    }

    async fn execute(self: Arc<Self>) -> Result<LocalExtension> {
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled(self.identifier.id.clone())),
            result = self.install() => result,
        };
        let state = match &result {
            Ok(_) => TaskState::Finished,
            Err(Error::Cancelled(_)) => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        };
        *lock(&self.state) = state;
        result
    }

    async fn install(&self) -> Result<LocalExtension> {
        match &self.source {
            InstallSource::Gallery(gallery) => self.install_from_gallery(gallery).await,
            InstallSource::Archive(archive) => self.install_from_archive(archive).await,
        }
    }

    fn set_operation(&self, operation: InstallOperation) {
        *lock(&self.operation) = operation;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled(self.identifier.id.clone()));
        }
        Ok(())
    }

    fn restart_required(&self, cause: Error) -> Error {
        warn!("Cannot replace files of '{}': {}", self.identifier, cause);
        Error::RestartRequired(self.identifier.id.clone())
    }

    async fn install_from_gallery(&self, gallery: &GalleryExtension) -> Result<LocalExtension> {
        let started = Instant::now();
        let existing = self.existing_user_install().await?;
        let operation = if existing.is_some() {
            InstallOperation::Update
        } else {
            InstallOperation::Install
        };
        self.set_operation(operation);

        let result = self.download_and_install(gallery, operation, existing.as_ref()).await;
        telemetry::install_outcome(operation, &self.identifier, started, result.as_ref().err());
        result
    }

    async fn download_and_install(
        &self,
        gallery: &GalleryExtension,
        operation: InstallOperation,
        existing: Option<&LocalExtension>,
    ) -> Result<LocalExtension> {
        let archive = self
            .ctx
            .downloader
            .download(gallery, operation)
            .await
            .map_err(|e| match e {
                Error::Download { .. } | Error::Cancelled(_) => e,
                other => Error::download(&self.identifier.id, other),
            })?;
        debug!("Downloaded '{}' to {}", self.identifier, archive.display());

        let result = self.install_downloaded(gallery, &archive, existing).await;

        if let Err(e) = self.ctx.downloader.delete(&archive).await {
            warn!("Failed to delete downloaded archive {}: {}", archive.display(), e);
        }
        result
    }

    async fn install_downloaded(
        &self,
        gallery: &GalleryExtension,
        archive: &Path,
        existing: Option<&LocalExtension>,
    ) -> Result<LocalExtension> {
        let manifest = self
            .ctx
            .store
            .read_manifest(archive)
            .await
            .map_err(|e| match e {
                Error::Validation { .. } => e,
                other => Error::validation(&self.identifier.id, other),
            })?;
        if !manifest.identifier().is_same(&self.identifier) || manifest.version != gallery.version {
            return Err(Error::validation(
                &self.identifier.id,
                format!(
                    "archive contains '{}' but the catalog entry is '{}@{}'",
                    manifest.identifier_with_version(),
                    self.identifier,
                    gallery.version
                ),
            ));
        }

        let mut metadata = Metadata::from_gallery(gallery);
        metadata.is_machine_scoped = self.options.is_machine_scoped
            || existing.is_some_and(|e| e.metadata.is_machine_scoped);
        metadata.is_builtin =
            self.options.is_builtin || existing.is_some_and(|e| e.metadata.is_builtin);

        let id = gallery.identifier_with_version();
        let local = self.install_extension(&id, archive, Some(&metadata)).await?;

        if let Some(existing) = existing {
            if existing.version() != &gallery.version {
                self.ctx.store.set_uninstalled(slice::from_ref(existing)).await?;
            }
        }

        info!("Installed '{}' from the catalog", id);
        if let Err(e) = self
            .ctx
            .catalog
            .report_statistic(
                &manifest.publisher,
                &manifest.name,
                &manifest.version,
                StatisticKind::Install,
            )
            .await
        {
            debug!("Could not report install of '{}': {}", id, e);
        }
        Ok(local)
    }

    async fn install_from_archive(&self, archive: &Path) -> Result<LocalExtension> {
        let id = self.identifier_with_version();
        let store = &self.ctx.store;

        let existing = self.existing_user_install().await?;
        match &existing {
            Some(existing) => {
                self.set_operation(InstallOperation::Update);
                if existing.version() == &id.version {
                    store
                        .remove(existing)
                        .await
                        .map_err(|e| self.restart_required(e))?;
                } else if existing.version() > &id.version {
                    debug!("Downgrading '{}' from {}", self.identifier, existing.version());
                    store.set_uninstalled(slice::from_ref(existing)).await?;
                }
            }
            None => {
                self.set_operation(InstallOperation::Install);
                if store.uninstalled_records().await?.contains(&id.key()) {
                    if let Some(stale) = store.set_installed(&id).await? {
                        store
                            .remove(&stale)
                            .await
                            .map_err(|e| self.restart_required(e))?;
                    }
                }
            }
        }

        let metadata = self.archive_metadata(existing.as_ref()).await;
        let local = self.install_extension(&id, archive, Some(&metadata)).await?;
        info!("Installed '{}' from {}", id, archive.display());
        Ok(local)
    }

    /// Metadata for an archive install: the caller's, else whatever the
    /// catalog knows about the same name. Scope flags of the install being
    /// replaced carry over.
    async fn archive_metadata(&self, existing: Option<&LocalExtension>) -> Metadata {
        let mut metadata = match &self.options.metadata {
            Some(metadata) => metadata.clone(),
            None => self.lookup_catalog_metadata().await.unwrap_or_default(),
        };
        metadata.is_machine_scoped |= self.options.is_machine_scoped
            || existing.is_some_and(|e| e.metadata.is_machine_scoped);
        metadata.is_builtin |=
            self.options.is_builtin || existing.is_some_and(|e| e.metadata.is_builtin);
        metadata
    }

    async fn lookup_catalog_metadata(&self) -> Option<Metadata> {
        if !self.ctx.catalog.is_enabled() {
            return None;
        }
        let query = CatalogQuery::by_names(vec![self.identifier.id.clone()]);
        match self.ctx.catalog.query(&query).await {
            Ok(found) => found.first().map(Metadata::from_gallery),
            Err(e) => {
                debug!("Catalog lookup for '{}' failed: {}", self.identifier, e);
                None
            }
        }
    }

    async fn existing_user_install(&self) -> Result<Option<LocalExtension>> {
        let installed = self.ctx.store.scan(ScanFilter::user()).await?;
        Ok(installed
            .into_iter()
            .find(|local| local.identifier.is_same(&self.identifier)))
    }

    /// Put `archive` into the store, or reactivate a soft-deleted copy of
    /// the same version.
    async fn install_extension(
        &self,
        id: &IdentifierWithVersion,
        archive: &Path,
        metadata: Option<&Metadata>,
    ) -> Result<LocalExtension> {
        let store = &self.ctx.store;

        if store.uninstalled_records().await?.contains(&id.key()) {
            debug!("Reactivating soft-deleted '{}'", id);
            let restored = store
                .set_installed(id)
                .await
                .map_err(|e| self.restart_required(e))?;
            match restored {
                Some(local) => {
                    return match metadata {
                        Some(metadata) => store.save_metadata(&local, metadata).await,
                        None => Ok(local),
                    };
                }
                None => debug!("Soft-deleted '{}' has no files left, extracting", id),
            }
        }

        self.check_cancelled()?;
        let local = store.extract(id, archive, &self.token).await?;
        match metadata {
            Some(metadata) => store.save_metadata(&local, metadata).await,
            None => Ok(local),
        }
    }
}

impl std::fmt::Debug for InstallTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallTask")
            .field("identifier", &self.identifier)
            .field("version", &self.identifier_with_version().version)
            .field("state", &self.state())
            .finish()
    }
}
