//! Writing and removing artifacts on disk

use colored::Colorize;
use reconcile::CommandRunner;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::artifact::{
    Argv, FILE_PREFIX, MANAGED_MARKER, MODPROBE_DIR, PersistenceArtifact, Removal, SYSCTL_FILE,
    SYSTEMD_DIR, UDEV_FILE, owners,
};
use crate::paths;

/// How the file on disk compares to the planned artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactStatus {
    Installed,
    /// Present but its content differs from the plan
    Stale,
    Missing,
}

pub fn status(artifact: &PersistenceArtifact) -> io::Result<ArtifactStatus> {
    match fs::read(&artifact.path) {
        Ok(content) if blake3::hash(&content) == artifact.digest() => {
            Ok(ArtifactStatus::Installed)
        }
        Ok(_) => Ok(ArtifactStatus::Stale),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ArtifactStatus::Missing),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactAction {
    Unchanged,
    Written,
    WouldWrite,
    Removed,
    AlreadyAbsent,
    WouldRemove,
    Failed(String),
}

impl ArtifactAction {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What happened to one artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
    pub id: String,
    pub path: PathBuf,
    pub action: ArtifactAction,
    /// Activation or deactivation commands that did not succeed
    pub warnings: Vec<String>,
}

impl ArtifactResult {
    fn new(id: &str, path: &Path, action: ArtifactAction) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_path_buf(),
            action,
            warnings: Vec::new(),
        }
    }
}

// ============================================================================
// Install
// ============================================================================

/// Write each artifact whose file differs, then run its activation commands
///
/// Files already matching their planned content are left alone and not
/// re-activated, so running this twice changes nothing the second time.
pub fn install(
    artifacts: &[PersistenceArtifact],
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> Vec<ArtifactResult> {
    artifacts
        .iter()
        .map(|artifact| install_one(artifact, runner, dry_run))
        .collect()
}

fn install_one(
    artifact: &PersistenceArtifact,
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> ArtifactResult {
    let result = |action| ArtifactResult::new(&artifact.id, &artifact.path, action);

    match status(artifact) {
        Ok(ArtifactStatus::Installed) => return result(ArtifactAction::Unchanged),
        Ok(_) => {}
        Err(e) => return result(ArtifactAction::Failed(format!("cannot read: {e}"))),
    }
    if dry_run {
        return result(ArtifactAction::WouldWrite);
    }

    if let Err(e) = write_atomic(&artifact.path, artifact.content.as_bytes()) {
        return result(ArtifactAction::Failed(format!("write failed: {e}")));
    }
    log::info!("Wrote {}", artifact.path.display());

    let mut written = result(ArtifactAction::Written);
    run_all(runner, &artifact.activate, &mut written.warnings);
    written
}

/// Write through a temporary sibling and rename it into place
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{name}.tmp"));

    let mut file = fs::File::create(&temp)?;
    let written = file.write_all(content).and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    fs::rename(&temp, path)
}

fn run_all(runner: &dyn CommandRunner, commands: &[Argv], warnings: &mut Vec<String>) {
    for argv in commands {
        let Some((cmd, rest)) = argv.split_first() else {
            continue;
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        let line = argv.join(" ");
        match runner.run(cmd, &args) {
            Ok(output) if output.success => log::debug!("Ran {line}"),
            Ok(output) => {
                let message = format!("{line}: {}", output.stderr_str().trim());
                log::warn!("{message}");
                warnings.push(message);
            }
            Err(e) => {
                let message = format!("{line}: {e}");
                log::warn!("{message}");
                warnings.push(message);
            }
        }
    }
}

// ============================================================================
// Uninstall
// ============================================================================

/// Deactivate and delete managed files
///
/// A file without the managed marker is never deleted.
pub fn uninstall(
    removals: &[Removal],
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> Vec<ArtifactResult> {
    removals
        .iter()
        .map(|removal| uninstall_one(removal, runner, dry_run))
        .collect()
}

fn uninstall_one(removal: &Removal, runner: &dyn CommandRunner, dry_run: bool) -> ArtifactResult {
    let result = |action| ArtifactResult::new(&removal.id, &removal.path, action);

    match is_managed(&removal.path) {
        Ok(true) => {}
        Ok(false) => {
            return result(ArtifactAction::Failed(
                "not managed by hosttune; left in place".to_string(),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return result(ArtifactAction::AlreadyAbsent);
        }
        Err(e) => return result(ArtifactAction::Failed(format!("cannot read: {e}"))),
    }
    if dry_run {
        return result(ArtifactAction::WouldRemove);
    }

    let mut removed = result(ArtifactAction::Removed);
    run_all(runner, &removal.deactivate, &mut removed.warnings);
    if let Err(e) = fs::remove_file(&removal.path) {
        removed.action = ArtifactAction::Failed(format!("remove failed: {e}"));
        return removed;
    }
    log::info!("Removed {}", removal.path.display());
    run_all(runner, &removal.after_removal, &mut removed.warnings);
    removed
}

fn is_managed(path: &Path) -> io::Result<bool> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .next()
        .is_some_and(|first| first.starts_with(MANAGED_MARKER)))
}

/// Find every managed file below `root`, whether or not it is still planned
pub fn discover(root: &Path) -> Vec<Removal> {
    let mut found = Vec::new();

    for fixed in [SYSCTL_FILE, UDEV_FILE] {
        let path = paths::under_root(root, fixed);
        if is_managed(&path).unwrap_or(false)
            && let Some(removal) = Removal::for_path(root, &path)
        {
            found.push(removal);
        }
    }

    for dir in [MODPROBE_DIR, SYSTEMD_DIR] {
        let mut in_dir: Vec<PathBuf> = WalkDir::new(paths::under_root(root, dir))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with(FILE_PREFIX))
            .map(|e| e.into_path())
            .filter(|p| is_managed(p).unwrap_or(false))
            .collect();
        in_dir.sort();
        found.extend(in_dir.iter().filter_map(|p| Removal::for_path(root, p)));
    }

    log::debug!("Discovered {} managed files below {}", found.len(), root.display());
    found
}

/// Parameter ids carried by the shared files currently installed below `root`
///
/// Service units carry exactly one parameter and are planned on their own,
/// so only owner lines in drop-ins, rules and module files count here.
pub fn installed_parameters(root: &Path) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for removal in discover(root) {
        let content = match fs::read_to_string(&removal.path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Could not read {}: {}", removal.path.display(), e);
                continue;
            }
        };
        for id in owners(&content) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

// ============================================================================
// Diff
// ============================================================================

/// Print what installing `artifact` would change in its file
pub fn show_diff(artifact: &PersistenceArtifact) {
    let current = fs::read_to_string(&artifact.path).unwrap_or_default();
    let diff = similar::TextDiff::from_lines(&current, &artifact.content);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(file is up to date)".dimmed());
    }
}
