//! Extension lifecycle orchestration.
//!
//! This crate resolves the dependency and extension-pack graph of an
//! extension, installs the resulting batch in dependency-ordered waves with
//! deduplication and rollback, and removes extensions while respecting
//! reverse dependencies. Storage, the catalog and downloads are reached
//! through the traits in [`collaborators`].

pub mod cancel;
pub mod collaborators;
pub mod config;
mod context;
pub mod dependency;
pub mod error;
pub mod events;
pub mod identifier;
pub mod manifest;
pub mod model;
pub mod registry;
pub mod report;
pub mod resolver;
mod scheduler;
pub mod service;
pub mod task;
mod telemetry;
mod uninstall;
pub mod version;

/// The canonical filename of an extension manifest inside an archive or
/// an installed extension directory.
pub const MANIFEST_FILENAME: &str = "extension.toml";

pub use cancel::CancellationToken;
pub use collaborators::{Catalog, CatalogQuery, Downloader, ExtensionStore};
pub use config::ManagerConfig;
pub use error::{Error, ErrorCode, Result};
pub use events::ExtensionEvent;
pub use identifier::{ExtensionIdentifier, IdentifierWithVersion};
pub use manifest::Manifest;
pub use model::{
    ExtensionKind, GalleryExtension, InstallOperation, InstallOptions, InstallResult,
    InstallSource, LocalExtension, Metadata, ScanFilter, StatisticKind, UninstallOptions,
};
pub use service::ExtensionManagementService;
pub use task::{InstallTask, TaskState};
pub use version::VersionConstraint;
