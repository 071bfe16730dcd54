//! Configuration loading and service construction.

use std::path::{Path, PathBuf};

use ext_core::{ExtensionManagementService, ManagerConfig};
use ext_fs::ConfigStore;
use tracing::debug;

use crate::error::Result;

/// Default configuration file, `<config dir>/extmgr/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("extmgr").join("config.toml"))
}

/// Load the configuration at `explicit`, else the default file if it
/// exists, else built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ManagerConfig> {
    if let Some(path) = explicit {
        debug!("Loading configuration from {}", path.display());
        return Ok(ConfigStore::new().load(path)?);
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            debug!("Loading configuration from {}", path.display());
            Ok(ConfigStore::new().load(&path)?)
        }
        _ => Ok(ManagerConfig::default()),
    }
}

pub fn open(explicit: Option<&Path>) -> Result<ExtensionManagementService> {
    let config = load_config(explicit)?;
    debug!(
        "Extensions in {}, catalog {}",
        config.extensions_dir().display(),
        config
            .catalog_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    Ok(ext_store::open_service(config))
}
