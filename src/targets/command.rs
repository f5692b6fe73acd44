//! Targets driven by management commands (`zpool`, `ethtool`, `nvidia-smi`)

use regex::Regex;
use reconcile::{CommandOutput, CommandRunner, Reading, Target, TargetError};
use std::io;
use std::sync::{Arc, LazyLock};

/// Run `cmd` and map spawn failures onto target errors
fn invoke(
    runner: &dyn CommandRunner,
    cmd: &str,
    args: &[&str],
) -> Result<CommandOutput, TargetError> {
    runner.run(cmd, args).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TargetError::NotFound(format!("{cmd} is not installed")),
        io::ErrorKind::TimedOut => TargetError::Timeout(runner.timeout()),
        io::ErrorKind::PermissionDenied => TargetError::PermissionDenied(cmd.to_string()),
        _ => TargetError::Io(e),
    })
}

/// Classify a non-zero exit from a management command by its message
fn classify_failure(location: &str, output: &CommandOutput) -> TargetError {
    let message = format!("{} {}", output.stderr_str(), output.stdout_str());
    let lower = message.to_lowercase();
    let summary = message.trim().lines().next().unwrap_or("").to_string();

    if lower.contains("permission") || lower.contains("not permitted") {
        TargetError::PermissionDenied(format!("{location}: {summary}"))
    } else if lower.contains("no such")
        || lower.contains("no device")
        || lower.contains("no devices were found")
        || lower.contains("does not exist")
    {
        TargetError::NotFound(format!("{location}: {summary}"))
    } else {
        TargetError::Rejected(format!("{location}: {summary}"))
    }
}

fn check(location: &str, output: CommandOutput) -> Result<String, TargetError> {
    if output.success {
        Ok(output.stdout_str())
    } else {
        Err(classify_failure(location, &output))
    }
}

// ============================================================================
// Storage pool property
// ============================================================================

/// A ZFS pool property such as `autotrim`
#[derive(Debug, Clone)]
pub struct PoolProperty {
    runner: Arc<dyn CommandRunner>,
    pool: String,
    property: String,
}

impl PoolProperty {
    pub fn new(runner: Arc<dyn CommandRunner>, pool: &str, property: &str) -> Self {
        Self {
            runner,
            pool: pool.to_string(),
            property: property.to_string(),
        }
    }
}

impl Target for PoolProperty {
    fn location(&self) -> String {
        format!("zpool:{}/{}", self.pool, self.property)
    }

    fn read(&self) -> Result<Reading, TargetError> {
        let output = invoke(
            self.runner.as_ref(),
            "zpool",
            &["get", "-H", "-o", "value", &self.property, &self.pool],
        )?;
        let value = check(&self.location(), output)?;
        match value.trim() {
            "" | "-" => Ok(Reading::Absent),
            v => Ok(Reading::Raw(v.to_string())),
        }
    }

    fn write(&self, raw: &str) -> Result<(), TargetError> {
        let assignment = format!("{}={}", self.property, raw);
        let output = invoke(
            self.runner.as_ref(),
            "zpool",
            &["set", &assignment, &self.pool],
        )?;
        check(&self.location(), output).map(|_| ())
    }
}

// ============================================================================
// NIC ring buffers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingDirection {
    Rx,
    Tx,
}

impl RingDirection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rx => "rx",
            Self::Tx => "tx",
        }
    }
}

/// Receive or transmit ring size of a network interface
#[derive(Debug, Clone)]
pub struct RingBuffer {
    runner: Arc<dyn CommandRunner>,
    iface: String,
    direction: RingDirection,
}

impl RingBuffer {
    pub fn new(runner: Arc<dyn CommandRunner>, iface: &str, direction: RingDirection) -> Self {
        Self {
            runner,
            iface: iface.to_string(),
            direction,
        }
    }
}

static RING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(RX|TX):\s+(\S+)").expect("valid ring regex"));

/// Extract the current RX or TX ring size from `ethtool -g` output
///
/// `None` when the section or the line is missing, or the driver reports `n/a`.
fn parse_current_ring(output: &str, direction: RingDirection) -> Option<String> {
    let wanted = direction.as_str().to_uppercase();
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Current hardware settings"))
        .skip(1)
        .filter_map(|line| RING_LINE.captures(line.trim()))
        .find(|caps| caps[1] == wanted)
        .map(|caps| caps[2].to_string())
        .filter(|v| v.chars().all(|c| c.is_ascii_digit()))
}

impl Target for RingBuffer {
    fn location(&self) -> String {
        format!("ethtool:{}/{}", self.iface, self.direction.as_str())
    }

    fn read(&self) -> Result<Reading, TargetError> {
        let output = invoke(self.runner.as_ref(), "ethtool", &["-g", &self.iface])?;
        let text = check(&self.location(), output)?;
        Ok(parse_current_ring(&text, self.direction).map_or(Reading::Absent, Reading::Raw))
    }

    fn write(&self, raw: &str) -> Result<(), TargetError> {
        let output = invoke(
            self.runner.as_ref(),
            "ethtool",
            &["-G", &self.iface, self.direction.as_str(), raw],
        )?;
        check(&self.location(), output).map(|_| ())
    }
}

// ============================================================================
// Accelerator settings
// ============================================================================

/// Accelerator setting managed through `nvidia-smi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuField {
    PersistenceMode,
    AccountingMode,
    /// Watts
    PowerLimit,
    /// Memory and graphics application clocks, MHz
    ApplicationClocks,
}

impl GpuField {
    fn query(self) -> &'static str {
        match self {
            Self::PersistenceMode => "persistence_mode",
            Self::AccountingMode => "accounting.mode",
            Self::PowerLimit => "power.limit",
            Self::ApplicationClocks => "clocks.applications.memory,clocks.applications.graphics",
        }
    }

    fn set_flag(self) -> &'static str {
        match self {
            Self::PersistenceMode => "-pm",
            Self::AccountingMode => "-am",
            Self::PowerLimit => "-pl",
            Self::ApplicationClocks => "-ac",
        }
    }

    /// Translate a written value into the flag argument
    fn set_argument(self, raw: &str) -> String {
        match (self, raw) {
            (Self::PersistenceMode | Self::AccountingMode, "Enabled") => "1".to_string(),
            (Self::PersistenceMode | Self::AccountingMode, "Disabled") => "0".to_string(),
            _ => raw.to_string(),
        }
    }
}

/// One accelerator setting on one device
#[derive(Debug, Clone)]
pub struct GpuSetting {
    runner: Arc<dyn CommandRunner>,
    gpu: String,
    field: GpuField,
}

impl GpuSetting {
    pub fn new(runner: Arc<dyn CommandRunner>, gpu: &str, field: GpuField) -> Self {
        Self {
            runner,
            gpu: gpu.to_string(),
            field,
        }
    }
}

/// Normalize a `--format=csv,noheader,nounits` line
fn parse_query(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.contains("[N/A]") || line.contains("Not Supported") {
        return None;
    }
    Some(line.to_string())
}

impl Target for GpuSetting {
    fn location(&self) -> String {
        format!("nvidia-smi:{}/{}", self.gpu, self.field.query())
    }

    fn read(&self) -> Result<Reading, TargetError> {
        let query = format!("--query-gpu={}", self.field.query());
        let output = invoke(
            self.runner.as_ref(),
            "nvidia-smi",
            &["-i", &self.gpu, &query, "--format=csv,noheader,nounits"],
        )?;
        let text = check(&self.location(), output)?;
        Ok(parse_query(&text).map_or(Reading::Absent, Reading::Raw))
    }

    fn write(&self, raw: &str) -> Result<(), TargetError> {
        let argument = self.field.set_argument(raw);
        let output = invoke(
            self.runner.as_ref(),
            "nvidia-smi",
            &["-i", &self.gpu, self.field.set_flag(), &argument],
        )?;
        // nvidia-smi reports some refusals on stdout with a zero exit
        let text = check(&self.location(), output)?;
        if text.contains("not supported") || text.contains("Unable to") {
            return Err(TargetError::Rejected(format!(
                "{}: {}",
                self.location(),
                text.trim()
            )));
        }
        Ok(())
    }
}
