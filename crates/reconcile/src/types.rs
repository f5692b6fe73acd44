//! Core types for host tuning reconciliation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Output;
use std::str::FromStr;
use thiserror::Error;

/// Tuning category a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Memory,
    Io,
    StoragePool,
    Network,
    Scheduler,
    AcceleratorClock,
    AcceleratorMode,
    CpuIdle,
}

impl Category {
    /// All categories in display order
    pub const ALL: [Category; 8] = [
        Category::Memory,
        Category::Io,
        Category::StoragePool,
        Category::Network,
        Category::Scheduler,
        Category::AcceleratorClock,
        Category::AcceleratorMode,
        Category::CpuIdle,
    ];

    /// Kebab-case name used on the command line and in records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Io => "io",
            Self::StoragePool => "storage-pool",
            Self::Network => "network",
            Self::Scheduler => "scheduler",
            Self::AcceleratorClock => "accelerator-clock",
            Self::AcceleratorMode => "accelerator-mode",
            Self::CpuIdle => "cpu-idle",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| ValueError::UnknownCategory(s.to_string()))
    }
}

/// How a target's value is read and written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Decimal integer
    Integer,
    /// One word out of a fixed set; sysfs lists mark the active one as `[word]`
    EnumString,
    /// Two integers, written as `a,b`
    CommaPair,
}

/// Errors produced while parsing values or names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected an integer, got {0:?}")]
    NotInteger(String),

    #[error("expected a single word, got {0:?}")]
    NotWord(String),

    #[error("expected two comma-separated integers, got {0:?}")]
    NotPair(String),

    #[error("unknown category {0:?}")]
    UnknownCategory(String),
}

/// A parameter value in one of the supported encodings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", content = "value")]
pub enum Value {
    Int(i64),
    Word(String),
    Pair(i64, i64),
    /// Members of a multi-file target disagree
    Mixed(Vec<String>),
}

impl Value {
    /// Parse raw target text using the given encoding
    pub fn parse(encoding: Encoding, raw: &str) -> Result<Self, ValueError> {
        let text = raw.trim();
        match encoding {
            Encoding::Integer => parse_int(text)
                .map(Value::Int)
                .ok_or_else(|| ValueError::NotInteger(text.to_string())),
            Encoding::EnumString => {
                let word = bracketed(text).unwrap_or(text);
                if !is_word(word) {
                    return Err(ValueError::NotWord(text.to_string()));
                }
                Ok(Value::Word(word.to_string()))
            }
            Encoding::CommaPair => {
                let parts: Vec<&str> = text
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|p| !p.is_empty())
                    .collect();
                match parts.as_slice() {
                    [a, b] => match (parse_int(a), parse_int(b)) {
                        (Some(a), Some(b)) => Ok(Value::Pair(a, b)),
                        _ => Err(ValueError::NotPair(text.to_string())),
                    },
                    _ => Err(ValueError::NotPair(text.to_string())),
                }
            }
        }
    }

    /// Whether this value can be written to a target with `encoding`
    pub fn matches_encoding(&self, encoding: Encoding) -> bool {
        matches!(
            (self, encoding),
            (Value::Int(_), Encoding::Integer)
                | (Value::Word(_), Encoding::EnumString)
                | (Value::Pair(..), Encoding::CommaPair)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Word(w) => f.write_str(w),
            Value::Pair(a, b) => write!(f, "{a},{b}"),
            Value::Mixed(values) => write!(f, "mixed({})", values.join("|")),
        }
    }
}

/// True for a non-empty token of `[A-Za-z0-9_.+:-]`
///
/// Words and device names end up in udev rules and boot-time shell commands,
/// so nothing outside this set is accepted.
pub fn is_word(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | ':' | '-'))
}

/// Accepts `42`, `-1` and `350.00` (fractional part must be zero)
fn parse_int(text: &str) -> Option<i64> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let (whole, frac) = text.split_once('.')?;
    if !frac.is_empty() && frac.chars().all(|c| c == '0') {
        whole.parse().ok()
    } else {
        None
    }
}

/// Extract `word` from `a [word] b`
fn bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    Some(text[start + 1..end].trim())
}

/// Whether a parameter's live value survives reboot unaided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Volatility {
    /// Resets on every boot or driver reload and nothing durable re-applies it
    Ephemeral,
    /// Kept across reboots once set through a durable OS mechanism
    PersistentViaOs,
}

/// Which value a run drives parameters toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Goal {
    /// The tuned value from the registry
    Desired,
    /// The shipped OS default
    Default,
    /// The most recent tuned value that was successfully applied
    LastKnownGood,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Goal::Desired => "apply",
            Goal::Default => "revert-to-default",
            Goal::LastKnownGood => "rollback",
        })
    }
}

/// Reconciliation mode: a goal, optionally previewed without writing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub goal: Goal,
    pub dry_run: bool,
}

impl Mode {
    pub fn apply() -> Self {
        Self {
            goal: Goal::Desired,
            dry_run: false,
        }
    }

    pub fn revert_to_default() -> Self {
        Self {
            goal: Goal::Default,
            dry_run: false,
        }
    }

    /// Report what `apply` would change without writing anything
    pub fn dry_run() -> Self {
        Self::apply().preview()
    }

    pub fn rollback() -> Self {
        Self {
            goal: Goal::LastKnownGood,
            dry_run: false,
        }
    }

    /// Same goal, no writes
    pub fn preview(self) -> Self {
        Self {
            dry_run: true,
            ..self
        }
    }
}

/// Result of reconciling one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Written and confirmed by re-read
    Applied,
    /// Already at the requested value; nothing written
    AlreadyMatched,
    /// Dry run: a write would have been made
    WouldChange,
    /// Optional target absent on this host, or nothing to act on
    Unsupported,
    /// Read or write refused by the OS, driver or firmware
    Denied,
    /// Write accepted but re-read did not show the requested value
    Unverified,
    /// Target missing or unreadable for a non-optional parameter
    Unreadable,
}

impl Outcome {
    /// Outcomes that need operator attention
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Denied | Self::Unverified | Self::Unreadable)
    }

    /// Whether the live value was changed
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyMatched => "already-matched",
            Self::WouldChange => "would-change",
            Self::Unsupported => "unsupported",
            Self::Denied => "denied",
            Self::Unverified => "unverified",
            Self::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub applied: usize,
    pub already_matched: usize,
    pub would_change: usize,
    pub unsupported: usize,
    pub denied: usize,
    pub unverified: usize,
    pub unreadable: usize,
}

impl RunSummary {
    /// Add an outcome to the summary
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::AlreadyMatched => self.already_matched += 1,
            Outcome::WouldChange => self.would_change += 1,
            Outcome::Unsupported => self.unsupported += 1,
            Outcome::Denied => self.denied += 1,
            Outcome::Unverified => self.unverified += 1,
            Outcome::Unreadable => self.unreadable += 1,
        }
    }

    /// Denied, unverified and unreadable; unsupported is not a failure
    pub fn failures(&self) -> usize {
        self.denied + self.unverified + self.unreadable
    }

    /// Check if the run finished without anything needing attention
    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }

    /// Total number of parameters processed
    pub fn total(&self) -> usize {
        self.applied
            + self.already_matched
            + self.would_change
            + self.unsupported
            + self.denied
            + self.unverified
            + self.unreadable
    }
}

/// Output from an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
