//! Command-line argument definitions for the launcher.

use std::path::PathBuf;

use clap::Parser;
use reh_config::DEFAULT_CONFIG_FILE;

/// Starts, upgrades and supervises a single remote extension host.
#[derive(Parser, Debug)]
#[command(name = "reh-launcher", version, about)]
pub(crate) struct Cli {
    /// Report the running instance, versions and service command line, then
    /// exit without acting.
    #[arg(short = 'n', long)]
    pub(crate) dry_run: bool,
    /// Stay attached to the terminal and echo service output.
    #[arg(short, long)]
    pub(crate) foreground: bool,
    /// Configuration file; a missing file means every default applies.
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub(crate) config: PathBuf,
    /// Directory to change into before doing anything else.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub(crate) workdir: Option<PathBuf>,
}
