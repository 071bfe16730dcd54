//! Expansion of a requested extension into everything it brings along.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};

use crate::collaborators::CatalogQuery;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::identifier::ExtensionIdentifier;
use crate::manifest::Manifest;
use crate::model::{GalleryExtension, LocalExtension, ScanFilter};

/// A catalog extension that has to be installed along with the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub gallery: GalleryExtension,
    pub manifest: Manifest,
}

/// Resolve the dependencies and pack members of `root`, transitively.
///
/// Installed extensions and the root itself are never returned. With
/// `only_newly_added_from_pack`, pack members that the installed version of
/// an expanded extension already listed are skipped, so an update does not
/// reinstall members the user removed. Returns nothing when the catalog is
/// disabled.
pub(crate) async fn resolve(
    ctx: &Context,
    root: &ExtensionIdentifier,
    root_manifest: &Manifest,
    only_newly_added_from_pack: bool,
) -> Result<Vec<Resolved>> {
    if !ctx.catalog.is_enabled() {
        debug!("Catalog disabled, not resolving dependencies of '{}'", root);
        return Ok(Vec::new());
    }

    let installed = ctx.store.scan(ScanFilter::all()).await?;
    let mut known: HashSet<String> = installed.iter().map(|local| local.identifier.key()).collect();
    known.insert(root.key());

    let mut resolved = Vec::new();
    let mut worklist = VecDeque::from([(root.clone(), root_manifest.clone())]);

    while let Some((identifier, manifest)) = worklist.pop_front() {
        let existing = if only_newly_added_from_pack {
            installed.iter().find(|local| local.identifier.is_same(&identifier))
        } else {
            None
        };

        let names: Vec<String> = related_ids(&manifest, existing)
            .into_iter()
            .filter(|id| !known.contains(&id.to_lowercase()))
            .collect();
        if names.is_empty() {
            continue;
        }

        debug!("Querying catalog for {:?} required by '{}'", names, identifier);
        let found = ctx.catalog.query(&CatalogQuery::by_names(names)).await?;
        for gallery in found {
            if !known.insert(gallery.identifier.key()) {
                continue;
            }
            let compatible = check_installable(ctx, &gallery).await?;
            let manifest = ctx.catalog.manifest(&compatible).await?.ok_or_else(|| {
                Error::validation(&compatible.identifier.id, "the catalog has no manifest for this version")
            })?;
            worklist.push_back((compatible.identifier.clone(), manifest.clone()));
            resolved.push(Resolved {
                gallery: compatible,
                manifest,
            });
        }
    }

    // Something may have been installed while the catalog was queried.
    let installed_now = ctx.store.scan(ScanFilter::all()).await?;
    resolved.retain(|r| {
        !installed_now
            .iter()
            .any(|local| local.identifier.is_same(&r.gallery.identifier))
    });

    if !resolved.is_empty() {
        info!("'{}' brings along {} more extension(s)", root, resolved.len());
    }
    Ok(resolved)
}

/// Dependencies followed by pack members, without duplicates. Pack members
/// of `existing` are left out.
fn related_ids(manifest: &Manifest, existing: Option<&LocalExtension>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push_unique = |id: &String| {
        if !ids.iter().any(|seen| seen.to_lowercase() == id.to_lowercase()) {
            ids.push(id.clone());
        }
    };

    manifest.dependencies.iter().for_each(&mut push_unique);
    for id in &manifest.extension_pack {
        let previously_packed = existing.is_some_and(|old| {
            old.manifest
                .extension_pack
                .iter()
                .any(|old_id| old_id.to_lowercase() == id.to_lowercase())
        });
        if !previously_packed {
            push_unique(id);
        }
    }
    ids
}

/// Reject reported extensions and pick the version compatible with the host.
pub(crate) async fn check_installable(ctx: &Context, gallery: &GalleryExtension) -> Result<GalleryExtension> {
    if ctx
        .reports
        .is_malicious(ctx.catalog.as_ref(), &gallery.identifier)
        .await
    {
        return Err(Error::Malicious(gallery.identifier.id.clone()));
    }

    ctx.catalog
        .compatible_version(gallery)
        .await?
        .ok_or_else(|| Error::Incompatible {
            extension: gallery.identifier.id.clone(),
            host_version: ctx.host_version().to_string(),
        })
}
