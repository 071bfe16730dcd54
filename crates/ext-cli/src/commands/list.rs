//! The list command

use std::path::PathBuf;

use colored::Colorize;
use ext_core::{ExtensionKind, ExtensionManagementService, LocalExtension, ScanFilter};
use serde::Serialize;

use crate::error::Result;

/// One row of `extmgr list --json`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ListedExtension {
    pub id: String,
    pub version: String,
    pub kind: ExtensionKind,
    pub display_name: Option<String>,
    pub uuid: Option<String>,
    pub machine_scoped: bool,
    pub location: PathBuf,
}

impl From<&LocalExtension> for ListedExtension {
    fn from(local: &LocalExtension) -> Self {
        Self {
            id: local.identifier.id.clone(),
            version: local.version().to_string(),
            kind: local.kind,
            display_name: local.manifest.display_name.clone(),
            uuid: local.metadata.uuid.clone(),
            machine_scoped: local.metadata.is_machine_scoped,
            location: local.location.clone(),
        }
    }
}

/// Run the list command
pub async fn run_list(service: &ExtensionManagementService, json: bool) -> Result<()> {
    let installed = service.installed(ScanFilter::all()).await?;

    if json {
        let rows: Vec<ListedExtension> = installed.iter().map(ListedExtension::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if installed.is_empty() {
        println!("No extensions installed. Use {} to add one.", "extmgr install <id>".cyan());
        return Ok(());
    }

    println!("{}", "Installed Extensions".bold());
    println!();
    for local in &installed {
        let kind = match local.kind {
            ExtensionKind::System => "system".dimmed(),
            ExtensionKind::User => "user".normal(),
        };
        println!(
            "  {:<32} {:<10} {} {}",
            local.identifier.id.green(),
            local.version().to_string(),
            kind,
            local.label().dimmed()
        );
    }
    println!();
    println!("{} {} extensions", "Total:".dimmed(), installed.len());
    Ok(())
}
