//! A catalog backed by a local directory.
//!
//! The directory holds extension archives and a `catalog.toml` index:
//!
//! ```toml
//! malicious = ["evil.miner"]
//!
//! [[extension]]
//! publisher = "acme"
//! name = "linter"
//! uuid = "6f1c..."
//! version = "1.2.0"
//! archive = "acme.linter-1.2.0.tar.gz"
//! sha256 = "sha256:..."
//! engine = ">=1.0"
//! publisher_display_name = "Acme"
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ext_core::{
    Catalog, CatalogQuery, ExtensionIdentifier, GalleryExtension, MANIFEST_FILENAME, Manifest,
    StatisticKind, VersionConstraint,
};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Error, Result, archive, blocking};

/// File name of the catalog index.
pub const CATALOG_FILENAME: &str = "catalog.toml";

/// One published version in the catalog index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub publisher: String,
    pub name: String,
    pub uuid: String,
    pub version: Version,
    /// Archive file name, relative to the catalog directory.
    pub archive: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_display_name: Option<String>,
}

impl CatalogEntry {
    fn identifier(&self) -> ExtensionIdentifier {
        ExtensionIdentifier::from_parts(&self.publisher, &self.name).with_uuid(&self.uuid)
    }

    fn is(&self, identifier: &ExtensionIdentifier) -> bool {
        self.identifier().is_same(identifier)
    }

    /// Whether this version declares support for `host`. Entries with an
    /// unparsable constraint never match.
    fn runs_on(&self, host: &Version) -> bool {
        match &self.engine {
            Some(engine) => VersionConstraint::parse(engine)
                .map(|constraint| constraint.satisfies_version(host))
                .unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    malicious: Vec<String>,
    #[serde(default, rename = "extension")]
    extensions: Vec<CatalogEntry>,
}

/// Reads the catalog index from a directory on every call.
#[derive(Debug)]
pub struct DirectoryCatalog {
    root: PathBuf,
    host_version: Version,
    /// Serializes publishing within this process.
    publish: Mutex<()>,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>, host_version: Version) -> Self {
        Self {
            root: root.into(),
            host_version,
            publish: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pack an extension source directory into the catalog and list it.
    ///
    /// A new version of an already listed extension keeps its uuid.
    pub fn publish(&self, source_dir: &Path) -> Result<GalleryExtension> {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);

        let manifest_path = source_dir.join(MANIFEST_FILENAME);
        let manifest = Manifest::from_path(&manifest_path).map_err(|e| Error::Manifest {
            path: manifest_path,
            reason: e.to_string(),
        })?;
        let file_name = format!("{}.tar.gz", manifest.identifier_with_version().key());
        let archive_path = self.root.join(&file_name);
        archive::pack_directory(source_dir, &archive_path)?;
        let sha256 = ext_fs::checksum::compute_file_checksum(&archive_path)
            .map_err(|e| Error::io(&archive_path, e))?;

        let mut document = load_document(&self.root)?;
        let uuid = document
            .extensions
            .iter()
            .find(|entry| manifest.identifier().matches_id(&entry.identifier().id))
            .map(|entry| entry.uuid.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = CatalogEntry {
            publisher: manifest.publisher.clone(),
            name: manifest.name.clone(),
            uuid,
            version: manifest.version.clone(),
            archive: file_name,
            sha256: Some(sha256),
            engine: manifest.engine.clone(),
            publisher_display_name: None,
        };
        document
            .extensions
            .retain(|e| !(e.is(&entry.identifier()) && e.version == entry.version));
        document.extensions.push(entry.clone());
        save_document(&self.root, &document)?;

        info!("Published '{}' to the catalog", manifest.identifier_with_version());
        Ok(to_gallery(&self.root, &entry))
    }

    /// Add an id to the list of reported extensions.
    pub fn report_malicious(&self, id: &str) -> Result<()> {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = load_document(&self.root)?;
        let reported = ExtensionIdentifier::new(id);
        if !document.malicious.iter().any(|m| reported.matches_id(m)) {
            document.malicious.push(id.to_string());
        }
        save_document(&self.root, &document)
    }

    async fn document(&self) -> Result<CatalogDocument> {
        let root = self.root.clone();
        blocking(move || load_document(&root)).await
    }
}

fn load_document(root: &Path) -> Result<CatalogDocument> {
    let path = root.join(CATALOG_FILENAME);
    match ext_fs::io::read_text_locked(&path)? {
        Some(content) => toml::from_str(&content).map_err(|e| Error::Parse {
            path,
            message: e.to_string(),
        }),
        None => Ok(CatalogDocument::default()),
    }
}

fn save_document(root: &Path, document: &CatalogDocument) -> Result<()> {
    let path = root.join(CATALOG_FILENAME);
    let content = toml::to_string_pretty(document).map_err(|e| Error::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    ext_fs::io::write_text(&path, &content)?;
    Ok(())
}

fn to_gallery(root: &Path, entry: &CatalogEntry) -> GalleryExtension {
    GalleryExtension {
        identifier: entry.identifier(),
        version: entry.version.clone(),
        publisher_display_name: entry.publisher_display_name.clone(),
        asset: root.join(&entry.archive).display().to_string(),
        engine: entry.engine.clone(),
        sha256: entry.sha256.clone(),
    }
}

/// Newest entry per identifier, in first-listed order.
fn newest_per_identifier<'a>(entries: impl Iterator<Item = &'a CatalogEntry>) -> Vec<&'a CatalogEntry> {
    let mut newest: Vec<&CatalogEntry> = Vec::new();
    for entry in entries {
        match newest.iter_mut().find(|n| n.is(&entry.identifier())) {
            Some(existing) if existing.version < entry.version => *existing = entry,
            Some(_) => {}
            None => newest.push(entry),
        }
    }
    newest
}

#[async_trait]
impl Catalog for DirectoryCatalog {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn query(&self, query: &CatalogQuery) -> ext_core::Result<Vec<GalleryExtension>> {
        let document = self.document().await?;
        let matching = document.extensions.iter().filter(|entry| {
            query.uuids.iter().any(|uuid| *uuid == entry.uuid)
                || query
                    .names
                    .iter()
                    .any(|name| entry.identifier().matches_id(name))
        });
        let mut results: Vec<GalleryExtension> = newest_per_identifier(matching)
            .into_iter()
            .map(|entry| to_gallery(&self.root, entry))
            .collect();
        if query.page_size > 0 {
            results.truncate(query.page_size);
        }
        debug!("Catalog query matched {} extension(s)", results.len());
        Ok(results)
    }

    async fn manifest(&self, extension: &GalleryExtension) -> ext_core::Result<Option<Manifest>> {
        let document = self.document().await?;
        let Some(entry) = document
            .extensions
            .iter()
            .find(|entry| entry.is(&extension.identifier) && entry.version == extension.version)
        else {
            return Ok(None);
        };
        let path = self.root.join(&entry.archive);
        let manifest = blocking(move || archive::read_manifest(&path)).await?;
        Ok(Some(manifest))
    }

    async fn compatible_version(
        &self,
        extension: &GalleryExtension,
    ) -> ext_core::Result<Option<GalleryExtension>> {
        let document = self.document().await?;
        Ok(document
            .extensions
            .iter()
            .filter(|entry| entry.is(&extension.identifier) && entry.runs_on(&self.host_version))
            .max_by(|a, b| a.version.cmp(&b.version))
            .map(|entry| to_gallery(&self.root, entry)))
    }

    async fn malicious_extensions(&self) -> ext_core::Result<Vec<ExtensionIdentifier>> {
        let document = self.document().await?;
        Ok(document
            .malicious
            .into_iter()
            .map(ExtensionIdentifier::new)
            .collect())
    }

    async fn report_statistic(
        &self,
        publisher: &str,
        name: &str,
        version: &Version,
        kind: StatisticKind,
    ) -> ext_core::Result<()> {
        info!(
            target: "telemetry",
            event = "catalogStatistic",
            statistic = kind.as_str(),
            extension = %format!("{publisher}.{name}"),
            version = %version,
        );
        Ok(())
    }
}

/// Stand-in used when no catalog is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCatalog;

#[async_trait]
impl Catalog for DisabledCatalog {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn query(&self, _query: &CatalogQuery) -> ext_core::Result<Vec<GalleryExtension>> {
        Err(ext_core::Error::CatalogDisabled)
    }

    async fn manifest(&self, _extension: &GalleryExtension) -> ext_core::Result<Option<Manifest>> {
        Ok(None)
    }

    async fn compatible_version(
        &self,
        _extension: &GalleryExtension,
    ) -> ext_core::Result<Option<GalleryExtension>> {
        Ok(None)
    }

    async fn malicious_extensions(&self) -> ext_core::Result<Vec<ExtensionIdentifier>> {
        Ok(Vec::new())
    }

    async fn report_statistic(
        &self,
        _publisher: &str,
        _name: &str,
        _version: &Version,
        _kind: StatisticKind,
    ) -> ext_core::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    #[rstest]
    #[case(None, true)]
    #[case(Some(">=1.0"), true)]
    #[case(Some(">=1.0,<1.5"), false)]
    #[case(Some("==1.5.0"), true)]
    #[case(Some("not a constraint"), false)]
    fn entry_runs_on_host(#[case] engine: Option<&str>, #[case] expected: bool) {
        let entry = CatalogEntry {
            publisher: "acme".into(),
            name: "a".into(),
            uuid: "u-1".into(),
            version: Version::new(1, 0, 0),
            archive: "acme.a-1.0.0.tar.gz".into(),
            sha256: None,
            engine: engine.map(String::from),
            publisher_display_name: None,
        };
        assert_eq!(entry.runs_on(&Version::new(1, 5, 0)), expected);
    }

    fn source(root: &Path, name: &str, version: &str, engine: Option<&str>) -> PathBuf {
        let dir = root.join(format!("src-{name}-{version}"));
        fs::create_dir_all(&dir).unwrap();
        let engine = engine
            .map(|e| format!("engine = \"{e}\"\n"))
            .unwrap_or_default();
        fs::write(
            dir.join(MANIFEST_FILENAME),
            format!(
                "[extension]\npublisher = \"acme\"\nname = \"{name}\"\nversion = \"{version}\"\n{engine}"
            ),
        )
        .unwrap();
        dir
    }

    fn catalog(temp: &TempDir) -> DirectoryCatalog {
        DirectoryCatalog::new(temp.path().join("catalog"), Version::new(1, 5, 0))
    }

    #[tokio::test]
    async fn query_returns_newest_version() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp);
        let first = catalog.publish(&source(temp.path(), "a", "1.0.0", None)).unwrap();
        let second = catalog.publish(&source(temp.path(), "a", "1.1.0", None)).unwrap();
        assert_eq!(first.identifier.uuid, second.identifier.uuid);

        let results = catalog
            .query(&CatalogQuery::by_names(vec!["ACME.A".into()]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].version, Version::new(1, 1, 0));
    }

    #[tokio::test]
    async fn query_by_uuid() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp);
        let a = catalog.publish(&source(temp.path(), "a", "1.0.0", None)).unwrap();
        catalog.publish(&source(temp.path(), "b", "1.0.0", None)).unwrap();

        let results = catalog
            .query(&CatalogQuery::by_identifier(&a.identifier))
            .await
            .unwrap();
        assert_eq!(results, vec![a]);
    }

    #[tokio::test]
    async fn compatible_version_respects_engine() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp);
        let old = catalog
            .publish(&source(temp.path(), "a", "1.0.0", Some(">=1.0")))
            .unwrap();
        let new = catalog
            .publish(&source(temp.path(), "a", "2.0.0", Some(">=2.0")))
            .unwrap();

        let compatible = catalog.compatible_version(&new).await.unwrap();
        assert_eq!(compatible, Some(old));
    }

    #[tokio::test]
    async fn manifest_is_read_from_archive() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp);
        let a = catalog.publish(&source(temp.path(), "a", "1.0.0", None)).unwrap();

        let manifest = catalog.manifest(&a).await.unwrap().unwrap();
        assert_eq!(manifest.id(), "acme.a");
        assert_eq!(manifest.version, a.version);
    }

    #[tokio::test]
    async fn malicious_list_round_trips() {
        let temp = TempDir::new().unwrap();
        let catalog = catalog(&temp);
        catalog.report_malicious("evil.miner").unwrap();
        catalog.report_malicious("EVIL.MINER").unwrap();

        let reported = catalog.malicious_extensions().await.unwrap();
        assert_eq!(reported, vec![ExtensionIdentifier::new("evil.miner")]);
    }

    #[tokio::test]
    async fn empty_directory_is_an_empty_catalog() {
        let temp = TempDir::new().unwrap();
        let results = catalog(&temp)
            .query(&CatalogQuery::by_names(vec!["acme.a".into()]))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
