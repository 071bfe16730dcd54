//! Manager configuration.

use std::path::PathBuf;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Directory name used under the platform data and cache directories.
const APP_DIR: &str = "extmgr";

/// Settings for an [`ExtensionManagementService`](crate::ExtensionManagementService)
/// and its stores.
///
/// Path fields are optional; unset paths fall back to the platform data
/// and cache directories.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Version of the host that extensions' engine constraints are checked
    /// against.
    pub host_version: Version,
    /// How long the list of reported extensions stays fresh.
    pub report_cache_ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_extensions_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host_version: Version::new(1, 0, 0),
            report_cache_ttl_secs: 300,
            extensions_dir: None,
            system_extensions_dir: None,
            catalog_dir: None,
            cache_dir: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_host_version(mut self, host_version: Version) -> Self {
        self.host_version = host_version;
        self
    }

    pub fn report_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.report_cache_ttl_secs)
    }

    /// Where user extensions are installed.
    pub fn extensions_dir(&self) -> PathBuf {
        self.extensions_dir
            .clone()
            .unwrap_or_else(|| data_root().join("extensions"))
    }

    /// Where downloaded archives are cached.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }

    /// The catalog directory; `None` disables the catalog.
    pub fn catalog_dir(&self) -> Option<PathBuf> {
        self.catalog_dir.clone()
    }
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}
