//! Uninstall coordination: dependents check, pack cascade and deduplicated
//! concurrent removal.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::ExtensionEvent;
use crate::identifier::ExtensionIdentifier;
use crate::model::{LocalExtension, ScanFilter, StatisticKind, UninstallOptions};
use crate::telemetry;

/// Uninstall `identifier` and, unless disabled, the members of its pack.
///
/// Members removed before another member fails stay removed.
pub(crate) async fn uninstall(
    ctx: &Arc<Context>,
    identifier: &ExtensionIdentifier,
    options: UninstallOptions,
) -> Result<()> {
    let installed = ctx.store.scan(ScanFilter::user()).await?;
    let target = installed
        .iter()
        .find(|local| local.identifier.is_same(identifier))
        .cloned()
        .ok_or_else(|| Error::NotInstalled(identifier.id.clone()))?;

    let members = if options.skip_pack {
        Vec::new()
    } else {
        pack_members(&target, &installed)
    };

    if !options.skip_dependents_check {
        if let Err(e) = check_dependents(&target, &members, &installed) {
            ctx.emit(ExtensionEvent::UninstallCompleted {
                identifier: target.identifier.clone(),
                error: Some(e.code()),
            });
            return Err(e);
        }
    }

    if !members.is_empty() {
        info!(
            "Uninstalling '{}' with pack members {:?}",
            target.identifier,
            members.iter().map(|m| m.identifier.id.as_str()).collect::<Vec<_>>()
        );
    }

    let removing: Vec<&LocalExtension> = std::iter::once(&target).chain(&members).collect();
    let outcomes = join_all(removing.iter().map(|local| remove_deduplicated(ctx, local))).await;
    let errors: Vec<Error> = outcomes.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::join(errors))
    }
}

/// Installed, non-builtin extensions reachable through pack lists from
/// `target`, each listed once. `target` itself is never a member.
fn pack_members(target: &LocalExtension, installed: &[LocalExtension]) -> Vec<LocalExtension> {
    let mut visited = HashSet::from([target.identifier.key()]);
    let mut members = Vec::new();
    let mut worklist = VecDeque::from([target]);

    while let Some(current) = worklist.pop_front() {
        for id in &current.manifest.extension_pack {
            let Some(member) = installed
                .iter()
                .find(|local| !local.is_builtin() && local.identifier.matches_id(id))
            else {
                continue;
            };
            if visited.insert(member.identifier.key()) {
                members.push(member.clone());
                worklist.push_back(member);
            }
        }
    }
    members
}

/// Fail if an installed extension outside the removal set depends on any
/// extension in it.
fn check_dependents(
    target: &LocalExtension,
    members: &[LocalExtension],
    installed: &[LocalExtension],
) -> Result<()> {
    let removing: HashSet<String> = std::iter::once(target)
        .chain(members)
        .map(|local| local.identifier.key())
        .collect();

    for extension in std::iter::once(target).chain(members) {
        let dependents: Vec<String> = installed
            .iter()
            .filter(|local| !removing.contains(&local.identifier.key()))
            .filter(|local| local.manifest.depends_on(&extension.identifier))
            .map(|local| local.label().to_string())
            .collect();
        if !dependents.is_empty() {
            let included = (!extension.identifier.is_same(&target.identifier))
                .then(|| extension.label().to_string());
            return Err(Error::Dependents {
                extension: target.label().to_string(),
                included,
                dependents,
            });
        }
    }
    Ok(())
}

/// Remove one extension, sharing the removal with any concurrent request for
/// the same identifier.
async fn remove_deduplicated(ctx: &Arc<Context>, local: &LocalExtension) -> Result<()> {
    let key = local.identifier.key();
    let (removal, guard) = ctx.uninstalling.get_or_insert(&key, || {
        let removal: BoxFuture<'static, Result<()>> = remove(Arc::clone(ctx), local.clone()).boxed();
        removal.shared()
    });
    if guard.is_none() {
        info!("'{}' is already requested to uninstall", local.identifier);
    }
    let result = removal.await;
    drop(guard);
    result
}

async fn remove(ctx: Arc<Context>, local: LocalExtension) -> Result<()> {
    let started = Instant::now();
    ctx.emit(ExtensionEvent::UninstallRequested(local.identifier.clone()));

    let result = soft_delete_all_versions(&ctx, &local).await;

    ctx.emit(ExtensionEvent::UninstallCompleted {
        identifier: local.identifier.clone(),
        error: result.as_ref().err().map(Error::code),
    });
    telemetry::uninstall_outcome(&local.identifier, started, result.as_ref().err());

    match &result {
        Ok(()) => {
            info!("Uninstalled '{}'", local.identifier_with_version());
            report_uninstall(&ctx, &local).await;
        }
        Err(e) => warn!("Failed to uninstall '{}': {}", local.identifier, e),
    }
    result
}

async fn soft_delete_all_versions(ctx: &Context, local: &LocalExtension) -> Result<()> {
    if !ctx.store.exists(local).await? {
        return Err(Error::NotFound(local.identifier.id.clone()));
    }
    let versions: Vec<LocalExtension> = ctx
        .store
        .scan(ScanFilter::all_user_versions())
        .await?
        .into_iter()
        .filter(|other| other.identifier.is_same(&local.identifier))
        .collect();
    ctx.store.set_uninstalled(&versions).await
}

async fn report_uninstall(ctx: &Context, local: &LocalExtension) {
    if !local.has_catalog_linkage() || !ctx.catalog.is_enabled() {
        return;
    }
    let manifest = &local.manifest;
    if let Err(e) = ctx
        .catalog
        .report_statistic(&manifest.publisher, &manifest.name, &manifest.version, StatisticKind::Uninstall)
        .await
    {
        debug!("Could not report uninstall of '{}': {}", local.identifier, e);
    }
}
