//! Uninstall, reinstall and clean-up commands

use colored::Colorize;
use ext_core::{
    Error, ExtensionIdentifier, ExtensionManagementService, ScanFilter, UninstallOptions,
};

use crate::commands::progress::Progress;
use crate::error::Result;

/// Run the uninstall command
pub async fn run_uninstall(
    service: &ExtensionManagementService,
    id: &str,
    no_pack: bool,
    force: bool,
) -> Result<()> {
    let options = UninstallOptions {
        skip_pack: no_pack,
        skip_dependents_check: force,
    };
    let progress = Progress::start(service.subscribe());

    let result = service.uninstall(&ExtensionIdentifier::new(id), options).await;
    progress.finish().await;
    result?;

    println!(
        "{} {} uninstalled. Run {} to free disk space.",
        "Done:".green().bold(),
        id.cyan(),
        "extmgr clean-up".bold()
    );
    Ok(())
}

/// Run the reinstall command
pub async fn run_reinstall(service: &ExtensionManagementService, id: &str) -> Result<()> {
    let identifier = ExtensionIdentifier::new(id);
    let local = service
        .installed(ScanFilter::user())
        .await?
        .into_iter()
        .find(|local| local.identifier.is_same(&identifier))
        .ok_or_else(|| Error::NotInstalled(id.to_string()))?;
    let progress = Progress::start(service.subscribe());

    let result = service.reinstall_from_gallery(&local).await;
    progress.finish().await;
    let reinstalled = result?;

    println!(
        "{} {} v{} reinstalled",
        "Done:".green().bold(),
        reinstalled.label().cyan(),
        reinstalled.version()
    );
    Ok(())
}

/// Run the clean-up command
pub async fn run_clean_up(service: &ExtensionManagementService) -> Result<()> {
    service.clean_up().await?;
    println!("{} Removed uninstalled and outdated files", "Done:".green().bold());
    Ok(())
}
