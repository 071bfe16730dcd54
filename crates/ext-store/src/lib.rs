//! Filesystem collaborators for the extension manager
//!
//! Provides the on-disk [`FsExtensionStore`], a [`DirectoryCatalog`] read
//! from a local directory, the [`DirectoryDownloader`] and archive helpers.

use std::sync::Arc;

use ext_core::{Catalog, ExtensionManagementService, ManagerConfig};

pub mod archive;
pub mod catalog;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod store;

pub use catalog::{CatalogEntry, DirectoryCatalog, DisabledCatalog};
pub use downloader::DirectoryDownloader;
pub use error::{Error, Result};
pub use ledger::UninstalledLedger;
pub use store::FsExtensionStore;

/// Build a service over the filesystem collaborators described by
/// `config`. Without a catalog directory the catalog is disabled.
pub fn open_service(config: ManagerConfig) -> ExtensionManagementService {
    let store = FsExtensionStore::with_system_dir(
        config.extensions_dir(),
        config.system_extensions_dir.clone(),
    );
    let catalog: Arc<dyn Catalog> = match config.catalog_dir() {
        Some(dir) => Arc::new(DirectoryCatalog::new(dir, config.host_version.clone())),
        None => Arc::new(DisabledCatalog),
    };
    let downloader = DirectoryDownloader::new(config.cache_dir());
    ExtensionManagementService::new(Arc::new(store), catalog, Arc::new(downloader), config)
}

/// Run blocking filesystem work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Join(e.to_string()))?
}
