//! Command implementations for ext-cli

pub mod install;
pub mod list;
pub mod progress;
pub mod uninstall;

pub use install::run_install;
pub use list::run_list;
pub use uninstall::{run_clean_up, run_reinstall, run_uninstall};
