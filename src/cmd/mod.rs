//! CLI command handlers.

use clap::Subcommand;

pub mod diagnostics;
pub mod root;

#[derive(Subcommand)]
pub enum Commands {
    /// Run diagnostics and display system/Docker/fleet information
    Diagnostics,
}
