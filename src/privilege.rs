//! Root privilege check for mutating commands
//!
//! hosttune never escalates by itself. A command that writes kernel state or
//! files under /etc must already run as root; previews never need it.

use anyhow::{Result, bail};

/// Whether the effective user is root
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Fail early when a non-preview `action` runs without root
pub fn require_root(action: &str, dry_run: bool) -> Result<()> {
    check(action, dry_run, is_root())
}

fn check(action: &str, dry_run: bool, root: bool) -> Result<()> {
    if dry_run || root {
        return Ok(());
    }
    bail!("{action} needs root privileges; re-run with sudo or pass --dry-run to preview")
}
