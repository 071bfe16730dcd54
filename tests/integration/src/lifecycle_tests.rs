//! End-to-end lifecycle tests
//!
//! These tests drive the service over the real filesystem store, a catalog
//! directory and the directory downloader, all inside a temp directory.

use std::fs;
use std::path::{Path, PathBuf};

use ext_core::{
    ErrorCode, ExtensionIdentifier, ExtensionManagementService, ExtensionStore, GalleryExtension,
    InstallOptions, MANIFEST_FILENAME, ManagerConfig, Manifest, ScanFilter, UninstallOptions,
};
use ext_store::{DirectoryCatalog, FsExtensionStore, archive};
use pretty_assertions::assert_eq;
use semver::Version;
use tempfile::TempDir;

struct TestEnv {
    temp: TempDir,
    config: ManagerConfig,
    service: ExtensionManagementService,
    catalog: DirectoryCatalog,
    store: FsExtensionStore,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let config = ManagerConfig {
            extensions_dir: Some(temp.path().join("extensions")),
            catalog_dir: Some(temp.path().join("catalog")),
            cache_dir: Some(temp.path().join("cache")),
            ..Default::default()
        };
        let service = ext_store::open_service(config.clone());
        let catalog = DirectoryCatalog::new(temp.path().join("catalog"), config.host_version.clone());
        let store = FsExtensionStore::new(config.extensions_dir());
        Self {
            temp,
            config,
            service,
            catalog,
            store,
        }
    }

    /// Write an extension source tree and return its directory.
    fn source(&self, manifest: &Manifest) -> PathBuf {
        let dir = self
            .temp
            .path()
            .join("sources")
            .join(manifest.identifier_with_version().key());
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join(MANIFEST_FILENAME), manifest.to_toml().unwrap()).unwrap();
        fs::write(dir.join("lib/main.lua"), format!("-- {}", manifest.id())).unwrap();
        dir
    }

    fn publish(&self, manifest: Manifest) -> GalleryExtension {
        let source = self.source(&manifest);
        self.catalog.publish(&source).unwrap()
    }

    async fn user_ids(&self) -> Vec<String> {
        self.service
            .installed(ScanFilter::user())
            .await
            .unwrap()
            .iter()
            .map(|local| local.identifier_with_version().to_string())
            .collect()
    }
}

fn manifest(name: &str, version: &str) -> Manifest {
    Manifest::new("acme", name, Version::parse(version).unwrap())
}

/// Relative paths of regular files under `root`, skipping hidden files.
fn visible_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        for entry in fs::read_dir(root.join(&relative)).unwrap() {
            let entry = entry.unwrap();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let child = relative.join(entry.file_name());
            if entry.file_type().unwrap().is_dir() {
                pending.push(child);
            } else {
                files.push(child);
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn test_catalog_install_brings_dependencies() {
    let env = TestEnv::new();
    env.publish(manifest("c", "1.0.0"));
    env.publish(manifest("b", "1.0.0").with_dependencies(["acme.c"]));
    let a = env.publish(manifest("a", "1.0.0").with_dependencies(["acme.b"]));

    let local = env
        .service
        .install_from_gallery(&a, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(local.identifier.uuid, a.identifier.uuid);
    assert_eq!(
        env.user_ids().await,
        vec!["acme.a@1.0.0", "acme.b@1.0.0", "acme.c@1.0.0"]
    );
    let installed = env.service.installed(ScanFilter::user()).await.unwrap();
    assert!(installed.iter().all(|local| local.has_catalog_linkage()));

    let cached = fs::read_dir(env.config.cache_dir())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(cached, 0, "downloaded archives should be deleted");
}

#[tokio::test]
async fn test_failed_dependency_rolls_back_batch() {
    let env = TestEnv::new();
    env.publish(manifest("b", "1.0.0"));
    let c = env.publish(manifest("c", "1.0.0"));
    let a = env.publish(manifest("a", "1.0.0").with_dependencies(["acme.b", "acme.c"]));

    // Replace c's archive so it no longer matches the published checksum.
    let tampered = env.source(&manifest("c", "1.0.0"));
    fs::write(tampered.join("lib/extra.lua"), "-- tampered").unwrap();
    archive::pack_directory(&tampered, Path::new(&c.asset)).unwrap();

    let err = env
        .service
        .install_from_gallery(&a, InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Downloading);
    assert!(env.user_ids().await.is_empty());
    let rolled_back: Vec<String> = env
        .store
        .scan_uninstalled()
        .await
        .unwrap()
        .iter()
        .map(|local| local.identifier.id.clone())
        .collect();
    assert_eq!(rolled_back, vec!["acme.b"]);
}

#[tokio::test]
async fn test_archive_install_round_trip() {
    let env = TestEnv::new();
    let source = env.source(&manifest("local", "0.3.0"));
    fs::create_dir_all(source.join("lib/nested")).unwrap();
    fs::write(source.join("lib/nested/deep.lua"), "return 42").unwrap();
    let archive_path = env.temp.path().join("local-0.3.0.tar.gz");
    archive::pack_directory(&source, &archive_path).unwrap();

    let local = env
        .service
        .install_archive(&archive_path, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(visible_files(&local.location), visible_files(&source));
    assert_eq!(
        fs::read_to_string(local.location.join("lib/nested/deep.lua")).unwrap(),
        "return 42"
    );
    assert!(archive_path.exists(), "local archives are left in place");
}

#[tokio::test]
async fn test_archive_install_over_stale_uninstalled_record() {
    let env = TestEnv::new();
    let extensions = env.config.extensions_dir();
    fs::create_dir_all(&extensions).unwrap();
    fs::write(
        extensions.join(".uninstalled.toml"),
        "keys = [\"acme.local-1.0.0\"]\n",
    )
    .unwrap();
    let source = env.source(&manifest("local", "1.0.0"));
    let archive_path = env.temp.path().join("local-1.0.0.tar.gz");
    archive::pack_directory(&source, &archive_path).unwrap();

    let local = env
        .service
        .install_archive(&archive_path, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(local.location, extensions.join("acme.local-1.0.0"));
    assert!(env.store.uninstalled_records().await.unwrap().is_empty());
    assert_eq!(env.user_ids().await, vec!["acme.local@1.0.0"]);
}

#[tokio::test]
async fn test_uninstall_pack_cascade_then_clean_up() {
    let env = TestEnv::new();
    env.publish(manifest("x", "1.0.0"));
    env.publish(manifest("y", "1.0.0"));
    let pack = env.publish(manifest("p", "1.0.0").with_extension_pack(["acme.x", "acme.y"]));
    env.service
        .install_from_gallery(&pack, InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(env.user_ids().await.len(), 3);

    env.service
        .uninstall(&ExtensionIdentifier::new("acme.p"), UninstallOptions::default())
        .await
        .unwrap();

    assert!(env.user_ids().await.is_empty());
    assert_eq!(env.store.scan_uninstalled().await.unwrap().len(), 3);

    env.service.clean_up().await.unwrap();
    for name in ["p", "x", "y"] {
        let id = manifest(name, "1.0.0").identifier_with_version();
        assert!(!env.store.location(&id).exists(), "{id} still on disk");
    }
    assert!(env.store.uninstalled_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dependents_block_uninstall() {
    let env = TestEnv::new();
    env.publish(manifest("b", "1.0.0"));
    let a = env.publish(manifest("a", "1.0.0").with_dependencies(["acme.b"]));
    env.service
        .install_from_gallery(&a, InstallOptions::default())
        .await
        .unwrap();

    let err = env
        .service
        .uninstall(&ExtensionIdentifier::new("acme.b"), UninstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Dependents);
    assert_eq!(env.user_ids().await, vec!["acme.a@1.0.0", "acme.b@1.0.0"]);
}

#[tokio::test]
async fn test_update_soft_deletes_previous_version() {
    let env = TestEnv::new();
    let v1 = env.publish(manifest("a", "1.0.0"));
    env.service
        .install_from_gallery(&v1, InstallOptions::default())
        .await
        .unwrap();

    env.publish(manifest("a", "1.1.0"));
    let latest = env.service.find_in_catalog(&v1.identifier).await.unwrap();
    assert_eq!(latest.version, Version::new(1, 1, 0));
    env.service
        .install_from_gallery(&latest, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(env.user_ids().await, vec!["acme.a@1.1.0"]);
    let hidden: Vec<String> = env
        .store
        .scan_uninstalled()
        .await
        .unwrap()
        .iter()
        .map(|local| local.identifier_with_version().to_string())
        .collect();
    assert_eq!(hidden, vec!["acme.a@1.0.0"]);
}

#[tokio::test]
async fn test_reinstall_restores_files() {
    let env = TestEnv::new();
    let a = env.publish(manifest("a", "1.0.0"));
    let local = env
        .service
        .install_from_gallery(&a, InstallOptions::default())
        .await
        .unwrap();
    fs::remove_file(local.location.join("lib/main.lua")).unwrap();

    let reinstalled = env.service.reinstall_from_gallery(&local).await.unwrap();

    assert_eq!(reinstalled.location, local.location);
    assert_eq!(
        fs::read_to_string(reinstalled.location.join("lib/main.lua")).unwrap(),
        "-- acme.a"
    );
    assert_eq!(env.user_ids().await, vec!["acme.a@1.0.0"]);
}

#[tokio::test]
async fn test_reported_extension_is_refused() {
    let env = TestEnv::new();
    let a = env.publish(manifest("a", "1.0.0"));
    env.catalog.report_malicious("acme.a").unwrap();

    let err = env
        .service
        .install_from_gallery(&a, InstallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Malicious);
    assert!(env.user_ids().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_installs_agree() {
    let env = TestEnv::new();
    let a = env.publish(manifest("a", "1.0.0"));
    let other = env.service.clone();

    let (first, second) = tokio::join!(
        env.service.install_from_gallery(&a, InstallOptions::default()),
        other.install_from_gallery(&a, InstallOptions::default()),
    );

    assert_eq!(first.unwrap().location, second.unwrap().location);
    assert_eq!(env.user_ids().await, vec!["acme.a@1.0.0"]);
    assert_eq!(env.service.installs_in_flight(), 0);
}
