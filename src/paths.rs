//! Centralized path resolution for hosttune
//!
//! # Environment Variables
//!
//! - `HOSTTUNE_CONFIG_DIR` - Override config directory
//! - `HOSTTUNE_STATE_DIR` - Override state directory (transaction log)
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config <file>` on the command line
//! 2. `HOSTTUNE_CONFIG_DIR/config.toml`
//! 3. `/etc/hosttune/config.toml`
//!
//! For state_dir():
//! 1. `HOSTTUNE_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/hosttune` (if set)
//! 3. `/var/lib/hosttune`

use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "HOSTTUNE_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "HOSTTUNE_STATE_DIR";

const DEFAULT_CONFIG_DIR: &str = "/etc/hosttune";
const DEFAULT_STATE_DIR: &str = "/var/lib/hosttune";

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the transaction log inside the state directory
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Get the hosttune config directory path
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return path;
    }

    PathBuf::from(DEFAULT_CONFIG_DIR)
}

/// Resolve the configuration file, honoring an explicit `--config` path
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => expand(&path.to_string_lossy()),
        None => config_dir().join(CONFIG_FILE),
    }
}

/// Get the hosttune state directory path
///
/// Priority:
/// 1. `HOSTTUNE_STATE_DIR` env var
/// 2. `XDG_STATE_HOME/hosttune`
/// 3. `/var/lib/hosttune`
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return path;
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("hosttune");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return path;
    }

    PathBuf::from(DEFAULT_STATE_DIR)
}

/// Path of the transaction log
pub fn journal_file() -> PathBuf {
    state_dir().join(JOURNAL_FILE)
}

/// Expand ~ and environment variables in a path string.
///
/// This is the canonical path expansion function for hosttune. All modules
/// should use this instead of calling shellexpand directly.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Re-root an absolute path under `root` (`/etc/x` under `/tmp/r` is `/tmp/r/etc/x`)
pub fn under_root(root: &Path, absolute: &str) -> PathBuf {
    root.join(absolute.trim_start_matches('/'))
}

// ============================================================================
// Tests
// ============================================================================
