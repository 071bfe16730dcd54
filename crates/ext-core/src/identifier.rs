//! Extension identity.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Identity of an extension: a case-insensitive `publisher.name` id and an
/// optional stable catalog uuid.
///
/// Use [`ExtensionIdentifier::is_same`] to compare identities. The derived
/// `PartialEq` is structural and only meant for tests and maps keyed by
/// [`ExtensionIdentifier::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionIdentifier {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ExtensionIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Build the `publisher.name` identifier used by the catalog.
    pub fn from_parts(publisher: &str, name: &str) -> Self {
        Self::new(format!("{publisher}.{name}"))
    }

    /// Case-folded id, the key used by registries and lookups.
    pub fn key(&self) -> String {
        self.id.to_lowercase()
    }

    /// Compare by uuid when both sides carry one, else by id ignoring case.
    pub fn is_same(&self, other: &ExtensionIdentifier) -> bool {
        match (&self.uuid, &other.uuid) {
            (Some(a), Some(b)) => a == b,
            _ => self.matches_id(&other.id),
        }
    }

    /// Compare against a bare id as it appears in a manifest list.
    pub fn matches_id(&self, id: &str) -> bool {
        self.key() == id.to_lowercase()
    }
}

impl fmt::Display for ExtensionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// An identifier pinned to one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierWithVersion {
    pub identifier: ExtensionIdentifier,
    pub version: Version,
}

impl IdentifierWithVersion {
    pub fn new(identifier: ExtensionIdentifier, version: Version) -> Self {
        Self {
            identifier,
            version,
        }
    }

    pub fn id(&self) -> &str {
        &self.identifier.id
    }

    /// Deduplication key: `<lowercased id>-<version>`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.identifier.key(), self.version)
    }

    /// Same identity and version.
    pub fn is_same(&self, other: &IdentifierWithVersion) -> bool {
        self.identifier.is_same(&other.identifier) && self.version == other.version
    }
}

impl fmt::Display for IdentifierWithVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier.id, self.version)
    }
}
