use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use reconcile::Category;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hosttune")]
#[command(version)]
#[command(about = "Idempotent host tuning: apply, revert, roll back and persist kernel and device settings", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: $HOSTTUNE_CONFIG_DIR/config.toml or /etc/hosttune/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive selected parameters to their tuned values
    Apply(RunArgs),

    /// Drive selected parameters back to the OS defaults
    #[command(alias = "revert-to-default")]
    Revert(RunArgs),

    /// Drive selected parameters to their last successfully applied tuned values
    Rollback(RunArgs),

    /// Report drift from the tuned values without changing anything
    Status(ViewArgs),

    /// Show the boot-time artifacts for the selected parameters
    PlanPersistence(ViewArgs),

    /// Write boot-time artifacts and activate them
    InstallPersistence(RunArgs),

    /// Remove boot-time artifacts (all managed files when nothing is selected)
    UninstallPersistence(RunArgs),

    /// Show the transaction log
    History(HistoryArgs),

    /// List the parameters known for this host
    List(ViewArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parameter selection shared by every command that acts on parameters
#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Only parameters in this category (repeatable)
    #[arg(short = 'c', long = "category", value_name = "CATEGORY")]
    pub categories: Vec<Category>,

    /// Only this parameter id (repeatable)
    #[arg(short = 'p', long = "param", value_name = "ID")]
    pub params: Vec<String>,
}

/// Commands that may change the host
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Show what would change without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Read-only commands
#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Only records for this parameter id
    #[arg(short = 'p', long = "param", value_name = "ID")]
    pub param: Option<String>,

    /// Show at most the last N records
    #[arg(short = 'l', long, value_name = "N")]
    pub limit: Option<usize>,

    /// Print the records as JSON
    #[arg(long)]
    pub json: bool,
}
