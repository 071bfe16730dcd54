//! Data types shared by the install and uninstall paths.

use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::identifier::{ExtensionIdentifier, IdentifierWithVersion};
use crate::manifest::Manifest;

/// Where an installed extension lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    /// Shipped with the host, read-only.
    System,
    /// Installed by the user.
    User,
}

/// Catalog linkage and install flags persisted next to an installed
/// extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Stable catalog id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_display_name: Option<String>,
    pub is_machine_scoped: bool,
    pub is_builtin: bool,
}

impl Metadata {
    /// Metadata linking an install to its catalog entry.
    pub fn from_gallery(gallery: &GalleryExtension) -> Self {
        Self {
            uuid: gallery.identifier.uuid.clone(),
            publisher_display_name: gallery.publisher_display_name.clone(),
            is_machine_scoped: false,
            is_builtin: false,
        }
    }

    /// Overlay the fields `other` sets. Flags are sticky: once set they are
    /// only cleared through an explicit scope update.
    pub fn merge(&mut self, other: &Metadata) {
        if other.uuid.is_some() {
            self.uuid.clone_from(&other.uuid);
        }
        if other.publisher_display_name.is_some() {
            self.publisher_display_name
                .clone_from(&other.publisher_display_name);
        }
        self.is_machine_scoped |= other.is_machine_scoped;
        self.is_builtin |= other.is_builtin;
    }
}

/// An extension present in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalExtension {
    pub identifier: ExtensionIdentifier,
    pub kind: ExtensionKind,
    pub manifest: Manifest,
    /// Directory holding the extension files.
    pub location: PathBuf,
    pub metadata: Metadata,
}

impl LocalExtension {
    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    pub fn identifier_with_version(&self) -> IdentifierWithVersion {
        IdentifierWithVersion::new(self.identifier.clone(), self.manifest.version.clone())
    }

    pub fn label(&self) -> &str {
        self.manifest.label()
    }

    pub fn is_builtin(&self) -> bool {
        self.metadata.is_builtin
    }

    /// Whether the extension came from the catalog.
    pub fn has_catalog_linkage(&self) -> bool {
        self.metadata.uuid.is_some()
    }
}

/// A catalog entry that can be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryExtension {
    pub identifier: ExtensionIdentifier,
    pub version: Version,
    pub publisher_display_name: Option<String>,
    /// Archive location understood by the [`Downloader`](crate::Downloader).
    pub asset: String,
    /// Host constraint of this version, if the catalog publishes it.
    pub engine: Option<String>,
    /// Hex SHA-256 of the archive, if the catalog publishes it.
    pub sha256: Option<String>,
}

impl GalleryExtension {
    pub fn identifier_with_version(&self) -> IdentifierWithVersion {
        IdentifierWithVersion::new(self.identifier.clone(), self.version.clone())
    }
}

/// What an install did to the existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallOperation {
    None,
    Install,
    Update,
}

/// Source of an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    Gallery(GalleryExtension),
    Archive(PathBuf),
}

/// Outcome of one task in a batch, as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub identifier: ExtensionIdentifier,
    /// Absent when the batch failed.
    pub local: Option<LocalExtension>,
    pub operation: InstallOperation,
    pub source: InstallSource,
    /// Classification of the batch failure, if any.
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub is_machine_scoped: bool,
    pub is_builtin: bool,
    /// Install only the requested extension, without resolving its
    /// dependencies and pack members.
    pub skip_pack_and_dependencies: bool,
    /// Catalog metadata to persist with an archive install.
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Remove only the requested extension, not its pack members.
    pub skip_pack: bool,
    /// Remove even when other installed extensions depend on it.
    pub skip_dependents_check: bool,
}

/// Selection of installed extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Restrict to one kind; `None` scans both.
    pub kind: Option<ExtensionKind>,
    /// Also return older versions that a newer install supersedes.
    pub include_outdated: bool,
}

impl ScanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn user() -> Self {
        Self {
            kind: Some(ExtensionKind::User),
            include_outdated: false,
        }
    }

    /// Every user version on disk, including superseded ones.
    pub fn all_user_versions() -> Self {
        Self {
            kind: Some(ExtensionKind::User),
            include_outdated: true,
        }
    }

    pub fn accepts(&self, kind: ExtensionKind) -> bool {
        self.kind.is_none_or(|k| k == kind)
    }
}

/// Statistics reported back to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticKind {
    Install,
    Uninstall,
}

impl StatisticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}
