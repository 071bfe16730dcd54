//! Extension manager CLI
//!
//! Installs extensions from a catalog directory or local archives and
//! removes them again, resolving dependencies and extension packs.

mod cli;
mod commands;
mod context;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use error::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    if cli.verbose {
        tracing::debug!("Verbose mode enabled");
    }

    let service = context::open(cli.config.as_deref())?;
    let result = execute_command(&service, cli.command).await;
    service.shutdown();
    result
}

async fn execute_command(
    service: &ext_core::ExtensionManagementService,
    cmd: Commands,
) -> Result<()> {
    match cmd {
        Commands::List { json } => commands::run_list(service, json).await,
        Commands::Install {
            target,
            machine_scoped,
            no_deps,
        } => commands::run_install(service, &target, machine_scoped, no_deps).await,
        Commands::Uninstall { id, no_pack, force } => {
            commands::run_uninstall(service, &id, no_pack, force).await
        }
        Commands::Reinstall { id } => commands::run_reinstall(service, &id).await,
        Commands::CleanUp => commands::run_clean_up(service).await,
    }
}
