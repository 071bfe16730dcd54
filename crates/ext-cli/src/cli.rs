//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Extension manager - install, update and remove extensions
#[derive(Parser, Debug)]
#[command(name = "extmgr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List installed extensions
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Install an extension from the catalog or a local archive
    ///
    /// Examples:
    ///   extmgr install acme.linter              # From the catalog
    ///   extmgr install ./linter-1.2.0.tar.gz    # From an archive
    Install {
        /// Catalog id (`publisher.name`) or path to a `.tar.gz` archive
        target: String,

        /// Mark the installation as machine-scoped
        #[arg(long)]
        machine_scoped: bool,

        /// Install only this extension, not its dependencies or pack
        #[arg(long)]
        no_deps: bool,
    },

    /// Uninstall an extension and the members of its pack
    Uninstall {
        /// Extension id (`publisher.name`)
        id: String,

        /// Leave pack members installed
        #[arg(long)]
        no_pack: bool,

        /// Uninstall even when other extensions depend on it
        #[arg(long)]
        force: bool,
    },

    /// Remove an installed extension and install it again from the catalog
    Reinstall {
        /// Extension id (`publisher.name`)
        id: String,
    },

    /// Delete files of uninstalled and superseded extensions
    CleanUp,
}
