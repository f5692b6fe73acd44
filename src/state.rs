//! Durable transaction log
//!
//! One JSON object per line in `<state_dir>/journal.jsonl`. Records are only
//! ever appended; each append is synced before returning.

use reconcile::{ChangeRecord, Journal};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Transaction log backed by a JSON Lines file
#[derive(Debug, Clone)]
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Open the log at `path`; the file is created on first append
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> io::Result<Vec<ChangeRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Journal {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "{}:{}: skipping unreadable record: {}",
                    self.path.display(),
                    index + 1,
                    e
                ),
            }
        }
        Ok(records)
    }
}

impl Journal for JsonlJournal {
    fn append(&mut self, record: &ChangeRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
        line.push('\n');

        // Single write per record: a crash leaves at most one torn final line
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if ends_torn(&mut file)? {
            log::warn!("{}: terminating a torn final line", self.path.display());
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()
    }

    fn history(&self, parameter_id: Option<&str>) -> io::Result<Vec<ChangeRecord>> {
        let mut records = self.read_all()?;
        if let Some(id) = parameter_id {
            records.retain(|r| r.parameter_id() == id);
        }
        Ok(records)
    }
}

/// True when the file is non-empty and its last byte is not a newline
fn ends_torn(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

// ============================================================================
// Tests
// ============================================================================
