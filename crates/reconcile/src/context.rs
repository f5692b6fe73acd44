//! Provider traits
//!
//! These traits allow the reconcile crate to be used without
//! depending on specific implementations of progress, prompts or
//! process execution.

use crate::journal::ChangeRecord;
use crate::types::{CommandOutput, Mode};
use std::fmt;
use std::io;
use std::time::Duration;

/// Runner for external commands
///
/// Implement this trait to execute management commands (`zpool`,
/// `nvidia-smi`, `systemctl`, ...). Implementations must bound the time
/// a command may take.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run a command, returning its output once it exits
    fn run(&self, cmd: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Time limit applied to each command
    fn timeout(&self) -> Duration;
}

/// Progress callback for reconciliation runs
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback {
    /// Called before the first parameter
    fn on_run_start(&mut self, count: usize, mode: Mode);

    /// Called when starting to reconcile a single parameter
    fn on_parameter_start(&mut self, id: &str, description: &str);

    /// Called when a parameter's record is complete
    fn on_parameter_complete(&mut self, record: &ChangeRecord);

    /// Called after the last parameter
    fn on_run_complete(&mut self);
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _count: usize, _mode: Mode) {}
    fn on_parameter_start(&mut self, _id: &str, _description: &str) {}
    fn on_parameter_complete(&mut self, _record: &ChangeRecord) {}
    fn on_run_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(true)
    }
}
