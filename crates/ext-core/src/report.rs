//! Cached list of extensions the catalog reports as malicious.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::collaborators::Catalog;
use crate::identifier::ExtensionIdentifier;

/// Keeps the reported list for a fixed time so that resolving a large batch
/// queries the catalog once.
pub struct ReportCache {
    ttl: Duration,
    // Held across the refresh so concurrent callers share one fetch.
    entry: Mutex<Option<(Instant, Arc<Vec<ExtensionIdentifier>>)>>,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The reported extensions, refreshed when stale. A failed refresh
    /// yields an empty list and is not cached.
    pub async fn malicious(&self, catalog: &dyn Catalog) -> Arc<Vec<ExtensionIdentifier>> {
        let mut entry = self.entry.lock().await;
        if let Some((fetched, list)) = entry.as_ref() {
            if fetched.elapsed() < self.ttl {
                return Arc::clone(list);
            }
        }

        match catalog.malicious_extensions().await {
            Ok(list) => {
                debug!(count = list.len(), "Refreshed malicious extension report");
                let list = Arc::new(list);
                *entry = Some((Instant::now(), Arc::clone(&list)));
                list
            }
            Err(e) => {
                warn!("Failed to fetch malicious extension report: {}", e);
                Arc::new(Vec::new())
            }
        }
    }

    pub async fn is_malicious(&self, catalog: &dyn Catalog, identifier: &ExtensionIdentifier) -> bool {
        self.malicious(catalog)
            .await
            .iter()
            .any(|reported| reported.is_same(identifier))
    }
}
