use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "trove",
    about = "Inspect and maintain Trove object stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// TOML config file with [pool] and [store] sections
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List stored keys
    Ls(LsArgs),
    /// Pretty-print one stored record
    Show(ShowArgs),
    /// Check records for corruption and dangling pointers
    Fsck,
    /// Delete records unreachable from the root
    Gc(GcArgs),
    /// Summarize the store
    Stats,
}

#[derive(Args)]
pub struct LsArgs {
    /// Show record type and size
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub key: String,
}

#[derive(Args)]
pub struct GcArgs {
    /// Report what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}
