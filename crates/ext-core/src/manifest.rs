//! Extension manifest parsing for `extension.toml` files.
//!
//! The manifest declares identity, host compatibility and the two relation
//! lists that drive resolution: hard `dependencies` and the softer
//! `extension_pack`. The canonical filename is
//! [`MANIFEST_FILENAME`](crate::MANIFEST_FILENAME).
//!
//! # Example TOML
//!
//! ```toml
//! [extension]
//! publisher = "acme"
//! name = "linter"
//! version = "1.2.0"
//! display_name = "Acme Linter"
//! engine = ">=1.40"
//! dependencies = ["acme.core"]
//! extension_pack = ["acme.themes"]
//! ```

use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifier::{ExtensionIdentifier, IdentifierWithVersion};
use crate::version::VersionConstraint;

/// Parsed extension manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub publisher: String,
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Host version constraint (e.g. `">=1.40,<2.0"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Extensions this one requires, as `publisher.name` ids.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Extensions bundled with this one, as `publisher.name` ids.
    #[serde(default)]
    pub extension_pack: Vec<String>,
}

/// On-disk layout: everything lives under the `[extension]` table.
#[derive(Deserialize, Serialize)]
struct ManifestDocument {
    extension: Manifest,
}

impl Manifest {
    /// Create a minimal manifest.
    pub fn new(publisher: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            publisher: publisher.into(),
            name: name.into(),
            version,
            display_name: None,
            description: None,
            engine: None,
            dependencies: Vec::new(),
            extension_pack: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extension_pack<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extension_pack = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Parse a manifest from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let document: ManifestDocument =
            toml::from_str(content).map_err(|e| Error::validation("<manifest>", e.message()))?;
        document.extension.validate()?;
        Ok(document.extension)
    }

    /// Read and parse a manifest from a file path.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(path.display().to_string(), format!("cannot read manifest: {e}"))
        })?;
        Self::from_toml(&content)
    }

    /// Serialize the manifest back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        let document = ManifestDocument {
            extension: self.clone(),
        };
        toml::to_string_pretty(&document).map_err(|e| Error::validation(self.id(), e))
    }

    /// The `publisher.name` id.
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }

    pub fn identifier(&self) -> ExtensionIdentifier {
        ExtensionIdentifier::from_parts(&self.publisher, &self.name)
    }

    pub fn identifier_with_version(&self) -> IdentifierWithVersion {
        IdentifierWithVersion::new(self.identifier(), self.version.clone())
    }

    /// Name shown to users.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether `identifier` is listed in `dependencies`.
    pub fn depends_on(&self, identifier: &ExtensionIdentifier) -> bool {
        self.dependencies.iter().any(|id| identifier.matches_id(id))
    }

    /// Whether `identifier` is listed in `extension_pack`.
    pub fn packs(&self, identifier: &ExtensionIdentifier) -> bool {
        self.extension_pack.iter().any(|id| identifier.matches_id(id))
    }

    /// Check the engine constraint against the host version.
    ///
    /// A manifest without an engine constraint runs everywhere.
    pub fn is_engine_compatible(&self, host_version: &Version) -> Result<bool> {
        match &self.engine {
            Some(engine) => Ok(VersionConstraint::parse(engine)?.satisfies_version(host_version)),
            None => Ok(true),
        }
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [("publisher", &self.publisher), ("name", &self.name)] {
            if value.is_empty() {
                return Err(Error::validation(
                    self.id(),
                    format!("extension {field} must not be empty"),
                ));
            }
            if !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(Error::validation(
                    self.id(),
                    format!(
                        "extension {field} must contain only alphanumeric characters, hyphens, or underscores"
                    ),
                ));
            }
        }

        if let Some(engine) = &self.engine {
            VersionConstraint::parse(engine)
                .map_err(|e| Error::validation(self.id(), format!("invalid engine: {e}")))?;
        }

        for id in self.dependencies.iter().chain(&self.extension_pack) {
            if id.split_once('.').is_none_or(|(p, n)| p.is_empty() || n.is_empty()) {
                return Err(Error::validation(
                    self.id(),
                    format!("'{id}' is not a publisher.name identifier"),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LINTER_TOML: &str = r#"
[extension]
publisher = "acme"
name = "linter"
version = "1.2.0"
display_name = "Acme Linter"
engine = ">=1.40"
dependencies = ["acme.core"]
extension_pack = ["acme.themes", "acme.snippets"]
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::from_toml(LINTER_TOML).unwrap();

        assert_eq!(manifest.id(), "acme.linter");
        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert_eq!(manifest.label(), "Acme Linter");
        assert_eq!(manifest.dependencies, vec!["acme.core"]);
        assert_eq!(manifest.extension_pack.len(), 2);
        assert!(manifest.depends_on(&ExtensionIdentifier::new("ACME.core")));
        assert!(manifest.packs(&ExtensionIdentifier::new("acme.snippets")));
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = Manifest::from_toml(
            r#"
[extension]
publisher = "acme"
name = "core"
version = "0.1.0"
"#,
        )
        .unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.extension_pack.is_empty());
        assert_eq!(manifest.label(), "core");
        assert!(manifest.is_engine_compatible(&Version::new(0, 0, 1)).unwrap());
    }

    #[test]
    fn test_invalid_version_rejected() {
        let result = Manifest::from_toml(
            r#"
[extension]
publisher = "acme"
name = "core"
version = "one"
"#,
        );
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn test_name_with_spaces_rejected() {
        let result = Manifest::from_toml(
            r#"
[extension]
publisher = "acme"
name = "my core"
version = "1.0.0"
"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("alphanumeric"), "got: {err}");
    }

    #[test]
    fn test_dependency_without_publisher_rejected() {
        let manifest = Manifest::new("acme", "core", Version::new(1, 0, 0)).with_dependencies(["lonely"]);
        let toml = manifest.to_toml().unwrap();
        assert!(Manifest::from_toml(&toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Manifest::from_toml(
            r#"
[extension]
publisher = "acme"
name = "core"
version = "1.0.0"
unknown = true
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_engine_compatibility() {
        let manifest = Manifest::from_toml(LINTER_TOML).unwrap();
        assert!(manifest.is_engine_compatible(&Version::new(1, 40, 0)).unwrap());
        assert!(!manifest.is_engine_compatible(&Version::new(1, 39, 9)).unwrap());
    }

    #[test]
    fn test_toml_round_trip() {
        let manifest = Manifest::from_toml(LINTER_TOML).unwrap();
        let reparsed = Manifest::from_toml(&manifest.to_toml().unwrap()).unwrap();
        assert_eq!(manifest, reparsed);
    }

    #[test]
    fn test_from_path_not_found() {
        let err = Manifest::from_path(Path::new("/nonexistent/extension.toml")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
