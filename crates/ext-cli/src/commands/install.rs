//! The install command

use std::path::Path;

use colored::Colorize;
use ext_core::{ExtensionIdentifier, ExtensionManagementService, InstallOptions, LocalExtension};

use crate::commands::progress::Progress;
use crate::error::Result;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Whether `target` names a local archive rather than a catalog id.
pub fn is_archive(target: &str) -> bool {
    target.ends_with(ARCHIVE_SUFFIX) || Path::new(target).is_file()
}

/// Run the install command
pub async fn run_install(
    service: &ExtensionManagementService,
    target: &str,
    machine_scoped: bool,
    no_deps: bool,
) -> Result<()> {
    let options = InstallOptions {
        is_machine_scoped: machine_scoped,
        skip_pack_and_dependencies: no_deps,
        ..Default::default()
    };
    let progress = Progress::start(service.subscribe());

    let result = install(service, target, options).await;
    progress.finish().await;
    let local = result?;

    println!(
        "{} {} v{} is ready",
        "Done:".green().bold(),
        local.label().cyan(),
        local.version()
    );
    Ok(())
}

async fn install(
    service: &ExtensionManagementService,
    target: &str,
    options: InstallOptions,
) -> Result<LocalExtension> {
    if is_archive(target) {
        return Ok(service.install_archive(Path::new(target), options).await?);
    }
    let gallery = service
        .find_in_catalog(&ExtensionIdentifier::new(target))
        .await?;
    Ok(service.install_from_gallery(&gallery, options).await?)
}
