use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::collaborators::{Catalog, Downloader, ExtensionStore};
use crate::config::ManagerConfig;
use crate::events::ExtensionEvent;
use crate::registry::{InstallingRegistry, UninstallingRegistry};
use crate::report::ReportCache;

/// State shared by the service, its tasks and its coordinators.
pub(crate) struct Context {
    pub store: Arc<dyn ExtensionStore>,
    pub catalog: Arc<dyn Catalog>,
    pub downloader: Arc<dyn Downloader>,
    pub config: ManagerConfig,
    pub reports: ReportCache,
    pub installing: InstallingRegistry,
    pub uninstalling: UninstallingRegistry,
    events: broadcast::Sender<ExtensionEvent>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        catalog: Arc<dyn Catalog>,
        downloader: Arc<dyn Downloader>,
        config: ManagerConfig,
        events: broadcast::Sender<ExtensionEvent>,
    ) -> Self {
        let reports = ReportCache::new(config.report_cache_ttl());
        Self {
            store,
            catalog,
            downloader,
            config,
            reports,
            installing: InstallingRegistry::default(),
            uninstalling: UninstallingRegistry::default(),
            events,
        }
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ExtensionEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.events.subscribe()
    }

    pub fn host_version(&self) -> &semver::Version {
        &self.config.host_version
    }
}
