mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod persist;
mod privilege;
mod progress;
mod registry;
mod runner;
mod state;
mod targets;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Explicit `--config` file
    pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
    };

    match cli.command {
        Command::Apply(args) => commands::tune::apply(&ctx, args),
        Command::Revert(args) => commands::tune::revert(&ctx, args),
        Command::Rollback(args) => commands::tune::rollback(&ctx, args),
        Command::Status(args) => commands::tune::status(&ctx, args),
        Command::PlanPersistence(args) => commands::persistence::plan(&ctx, args),
        Command::InstallPersistence(args) => commands::persistence::install(&ctx, args),
        Command::UninstallPersistence(args) => commands::persistence::uninstall(&ctx, args),
        Command::History(args) => commands::history::run(&ctx, args),
        Command::List(args) => commands::list::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hosttune", &mut io::stdout());
            Ok(())
        }
    }
}
