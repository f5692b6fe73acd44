//! Kernel virtual-file targets

use reconcile::{Reading, Target, TargetError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use super::with_timeout;

/// A single virtual file such as `/proc/sys/vm/swappiness`
#[derive(Debug, Clone)]
pub struct VirtualFile {
    path: PathBuf,
    timeout: Duration,
}

impl VirtualFile {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

impl Target for VirtualFile {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<Reading, TargetError> {
        let path = self.path.clone();
        with_timeout(self.timeout, &self.location(), move || {
            fs::read_to_string(&path)
        })
        .map(Reading::Raw)
    }

    fn write(&self, raw: &str) -> Result<(), TargetError> {
        let path = self.path.clone();
        let data = raw.to_string();
        with_timeout(self.timeout, &self.location(), move || {
            write_existing(&path, &data)
        })
    }
}

/// Write to a file that must already exist; virtual files are never created
fn write_existing(path: &Path, data: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data.as_bytes())
}

/// The same attribute under every matching directory
///
/// Example: `cpuN/cpuidle/state2/disable` below
/// `/sys/devices/system/cpu`. Reads as one value when all members agree and
/// as [`Reading::Mixed`] when they do not; writes go to every member.
#[derive(Debug, Clone)]
pub struct FileSet {
    root: PathBuf,
    /// Member directories are this prefix followed by a number
    dir_prefix: String,
    relative: PathBuf,
    timeout: Duration,
}

impl FileSet {
    pub fn new(
        root: impl Into<PathBuf>,
        dir_prefix: &str,
        relative: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            dir_prefix: dir_prefix.to_string(),
            relative: relative.into(),
            timeout,
        }
    }

    /// Existing member files, ordered by the numeric suffix of their directory
    pub fn members(&self) -> Vec<PathBuf> {
        let mut found: Vec<(u64, PathBuf)> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let index = name.strip_prefix(&self.dir_prefix)?.parse::<u64>().ok()?;
                let file = e.path().join(&self.relative);
                file.exists().then_some((index, file))
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, path)| path).collect()
    }
}

impl Target for FileSet {
    fn location(&self) -> String {
        format!(
            "{}/{}*/{}",
            self.root.display(),
            self.dir_prefix,
            self.relative.display()
        )
    }

    fn read(&self) -> Result<Reading, TargetError> {
        let members = self.members();
        if members.is_empty() {
            return Ok(Reading::Absent);
        }

        let mut values = Vec::with_capacity(members.len());
        for member in members {
            let location = member.display().to_string();
            let text = with_timeout(self.timeout, &location, move || {
                fs::read_to_string(&member)
            })?;
            values.push(text.trim().to_string());
        }

        let first = values[0].clone();
        if values.iter().all(|v| *v == first) {
            Ok(Reading::Raw(first))
        } else {
            Ok(Reading::Mixed(values))
        }
    }

    fn write(&self, raw: &str) -> Result<(), TargetError> {
        let members = self.members();
        if members.is_empty() {
            return Err(TargetError::NotFound(self.location()));
        }

        let mut first_error = None;
        for member in members {
            let location = member.display().to_string();
            let data = raw.to_string();
            if let Err(e) = with_timeout(self.timeout, &location, move || {
                write_existing(&member, &data)
            }) {
                log::warn!("{location}: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_virtual_file_read_write() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("swappiness");
        fs::write(&path, "60\n").unwrap();

        let target = VirtualFile::new(&path, TIMEOUT);
        assert_eq!(target.read().unwrap(), Reading::Raw("60\n".into()));

        target.write("5").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "5");
    }

    #[test]
    fn test_virtual_file_missing_is_not_found_and_never_created() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scheduler");
        let target = VirtualFile::new(&path, TIMEOUT);

        assert!(matches!(target.read(), Err(TargetError::NotFound(_))));
        assert!(matches!(target.write("none"), Err(TargetError::NotFound(_))));
        assert!(!path.exists());
    }

    fn cpu_tree(values: &[&str]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (i, v) in values.iter().enumerate() {
            let dir = temp.path().join(format!("cpu{i}/cpuidle/state2"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("disable"), format!("{v}\n")).unwrap();
        }
        fs::create_dir_all(temp.path().join("cpufreq")).unwrap();
        temp
    }

    fn idle_set(root: &Path) -> FileSet {
        FileSet::new(root, "cpu", "cpuidle/state2/disable", TIMEOUT)
    }

    #[test]
    fn test_file_set_agreeing_members_read_as_one() {
        let temp = cpu_tree(&["0", "0", "0"]);
        let set = idle_set(temp.path());
        assert_eq!(set.members().len(), 3);
        assert_eq!(set.read().unwrap(), Reading::Raw("0".into()));
    }

    #[test]
    fn test_file_set_disagreement_is_mixed() {
        let temp = cpu_tree(&["1", "0"]);
        let set = idle_set(temp.path());
        assert_eq!(
            set.read().unwrap(),
            Reading::Mixed(vec!["1".into(), "0".into()])
        );
    }

    #[test]
    fn test_file_set_write_reaches_every_member() {
        let temp = cpu_tree(&["0", "1", "0", "0"]);
        let set = idle_set(temp.path());
        set.write("1").unwrap();
        assert_eq!(set.read().unwrap(), Reading::Raw("1".into()));
    }

    #[test]
    fn test_file_set_without_members_is_absent() {
        let temp = TempDir::new().unwrap();
        let set = idle_set(temp.path());
        assert_eq!(set.read().unwrap(), Reading::Absent);
        assert!(set.write("1").is_err());
    }

    #[test]
    fn test_members_sorted_numerically() {
        let values: Vec<&str> = vec!["0"; 12];
        let temp = cpu_tree(&values);
        let members = idle_set(temp.path()).members();
        assert!(members[2].to_string_lossy().contains("cpu2/"));
        assert!(members[10].to_string_lossy().contains("cpu10/"));
    }
}
