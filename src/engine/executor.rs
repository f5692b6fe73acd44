//! Run execution - hosttune-specific executor with UI integration

use anyhow::{Result, bail};
use colored::Colorize;
use reconcile::{AutoConfirm, ConfirmCallback, Goal, Mode, Parameter, RunReport, reconcile};
use std::io;

use crate::paths;
use crate::privilege;
use crate::progress::RunProgress;
use crate::state::JsonlJournal;
use crate::ui;

use super::report::{self, JsonReport};

/// Options for one run (includes `yes` for confirmation skip)
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Print the report as JSON instead of the table
    pub json: bool,
    /// Suppress the progress bar
    pub quiet: bool,
}

/// Reconcile `parameters` toward `goal` and print the result
///
/// Returns `None` when the operator declined the confirmation prompt.
pub fn execute(
    parameters: &[&Parameter],
    goal: Goal,
    title: &str,
    opts: &RunOptions,
) -> Result<Option<RunReport>> {
    let mode = Mode {
        goal,
        dry_run: opts.dry_run,
    };
    if needs_privilege(parameters) {
        privilege::require_root(&goal.to_string(), mode.dry_run)?;
    }

    if !mode.dry_run && !parameters.is_empty() {
        if !opts.json {
            println!();
            println!(
                "  {} {} will write {} parameters on this host",
                "→".cyan(),
                goal.to_string().bold(),
                parameters.len()
            );
        }
        if !confirm_proceed(opts.yes)? {
            eprintln!("  {} Aborted", "✗".red());
            return Ok(None);
        }
    }

    let mut journal = JsonlJournal::open(paths::journal_file());
    log::debug!("Using journal {}", journal.path().display());

    let mut progress = RunProgress::new(opts.quiet || opts.json);
    let report = reconcile(parameters, mode, &mut journal, &mut progress);

    if opts.json {
        ui::json(&JsonReport::new(&report))?;
    } else {
        report::display(&report, title);
    }

    Ok(Some(report))
}

fn needs_privilege(parameters: &[&Parameter]) -> bool {
    parameters.iter().any(|p| p.requires_privilege)
}

/// Interactive confirmation on the terminal
pub struct TerminalConfirm;

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(io::Error::other)
    }
}

/// Confirm with user, or accept straight away for `--yes`
///
/// Fails before anything is changed when there is no terminal to ask on.
pub fn confirm_proceed(yes: bool) -> Result<bool> {
    check_attended(yes, console::user_attended_stderr())?;
    let mut confirm: Box<dyn ConfirmCallback> = if yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(TerminalConfirm)
    };
    Ok(confirm.confirm("Continue?")?)
}

fn check_attended(yes: bool, attended: bool) -> Result<()> {
    if !yes && !attended {
        bail!("No terminal to confirm on; pass --yes to run without prompting");
    }
    Ok(())
}
