//! Batch installation: resolve, plan waves, run, and roll back on failure.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::dependency::{DependencyGraph, DependencyNode};
use crate::error::{Error, Result};
use crate::events::ExtensionEvent;
use crate::model::{InstallOptions, InstallResult, LocalExtension};
use crate::registry::InstallGuard;
use crate::resolver;
use crate::task::InstallTask;

/// Install `root` and everything it brings along.
///
/// If a task for the same version is already in flight, its outcome is
/// returned instead. Otherwise the batch runs in dependency-ordered waves and
/// stops at the first wave with a failure, in which case every install that
/// succeeded in this batch is soft-deleted again.
pub(crate) async fn install_batch(
    ctx: &Arc<Context>,
    root: Arc<InstallTask>,
    options: &InstallOptions,
    only_newly_added_from_pack: bool,
) -> Result<InstallResult> {
    let key = root.identifier_with_version().key();
    let mut guards: Vec<InstallGuard<'_>> = Vec::new();

    let root = if root.is_from_gallery() {
        let (task, guard) = ctx.installing.get_or_register(&key, || root);
        match guard {
            Some(guard) => {
                guards.push(guard);
                task
            }
            None => return join_in_flight(task).await,
        }
    } else {
        match ctx.installing.get(&key) {
            Some(task) => return join_in_flight(task).await,
            None => root,
        }
    };

    let mut tasks = vec![Arc::clone(&root)];
    let outcome = run_batch(ctx, &root, options, only_newly_added_from_pack, &mut tasks, &mut guards).await;

    match outcome {
        Ok(locals) => {
            let results: Vec<InstallResult> = tasks
                .iter()
                .zip(locals)
                .map(|(task, local)| task.result(Some(local), None))
                .collect();
            ctx.emit(ExtensionEvent::BatchInstallCompleted(results.clone()));
            results
                .into_iter()
                .find(|result| result.identifier.is_same(root.identifier()))
                .ok_or_else(|| Error::Unknown(format!("no result for '{}'", root.identifier())))
        }
        Err((error, succeeded)) => {
            for task in &tasks {
                task.cancel();
            }
            roll_back(ctx, &succeeded).await;

            let code = error.code();
            let results = tasks.iter().map(|task| task.result(None, Some(code))).collect();
            ctx.emit(ExtensionEvent::BatchInstallCompleted(results));
            warn!("Installing '{}' failed: {}", root.identifier(), error);
            Err(error)
        }
    }
    // `guards` drop here and release every catalog task of the batch.
}

async fn join_in_flight(task: Arc<InstallTask>) -> Result<InstallResult> {
    info!("'{}' is already being installed", task.identifier_with_version());
    let local = task.wait_until_finished().await?;
    Ok(task.result(Some(local), None))
}

/// Run the batch. On success the installed extensions are returned in the
/// order of `tasks`; on failure the error is returned with whatever was
/// installed before it.
async fn run_batch<'a>(
    ctx: &'a Arc<Context>,
    root: &Arc<InstallTask>,
    options: &InstallOptions,
    only_newly_added_from_pack: bool,
    tasks: &mut Vec<Arc<InstallTask>>,
    guards: &mut Vec<InstallGuard<'a>>,
) -> std::result::Result<Vec<LocalExtension>, (Error, Vec<LocalExtension>)> {
    let mut root_has_dependents = false;

    if !options.skip_pack_and_dependencies {
        let resolved = resolver::resolve(ctx, root.identifier(), root.manifest(), only_newly_added_from_pack)
            .await
            .map_err(|e| (e, Vec::new()))?;

        let member_options = InstallOptions {
            skip_pack_and_dependencies: true,
            ..options.clone()
        };
        for member in resolved {
            root_has_dependents |= member.manifest.depends_on(root.identifier());
            let task = InstallTask::from_gallery(
                Arc::clone(ctx),
                member.gallery,
                member.manifest,
                member_options.clone(),
            );
            match ctx.installing.try_register(&task) {
                Some(guard) => {
                    guards.push(guard);
                    tasks.push(task);
                }
                None => info!("'{}' is already requested to install", task.identifier_with_version()),
            }
        }
    }

    for task in tasks.iter() {
        ctx.emit(ExtensionEvent::InstallRequested {
            identifier: task.identifier().clone(),
            source: task.source().clone(),
        });
    }

    let mut graph = DependencyGraph::new();
    for task in tasks.iter() {
        let node = task
            .manifest()
            .dependencies
            .iter()
            .fold(DependencyNode::new(&task.identifier().id), |node, dep| node.depends_on(dep));
        graph.add_node(node);
    }

    let mut locals: Vec<Option<LocalExtension>> = vec![None; tasks.len()];
    for wave in graph.waves(Some(0), root_has_dependents) {
        debug!(
            circular = wave.circular,
            "Installing {:?}",
            wave.members.iter().map(|&i| tasks[i].identifier().id.as_str()).collect::<Vec<_>>()
        );
        let outcomes = join_all(wave.members.iter().map(|&i| tasks[i].run())).await;

        let mut errors = Vec::new();
        for (&index, outcome) in wave.members.iter().zip(outcomes) {
            match outcome {
                Ok(local) => locals[index] = Some(local),
                Err(e) => {
                    warn!("Failed to install '{}': {}", tasks[index].identifier(), e);
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() {
            let installed = locals.into_iter().flatten().collect();
            return Err((Error::join(errors), installed));
        }
    }

    Ok(locals.into_iter().flatten().collect())
}

/// Soft-delete what a failed batch installed. Failures are only logged.
async fn roll_back(ctx: &Context, installed: &[LocalExtension]) {
    let outcomes = join_all(installed.iter().map(|local| async move {
        (local, ctx.store.set_uninstalled(std::slice::from_ref(local)).await)
    }))
    .await;
    for (local, outcome) in outcomes {
        match outcome {
            Ok(()) => info!("Rolled back '{}'", local.identifier_with_version()),
            Err(e) => warn!("Failed to roll back '{}': {}", local.identifier_with_version(), e),
        }
    }
}
