//! hosttune configuration (`config.toml`)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

// ============================================================================
// Main Config Schema
// ============================================================================

/// The hosttune configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HosttuneConfig {
    /// Parameter ids excluded from every run
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Devices and roots this host exposes
    #[serde(default)]
    pub host: HostConfig,

    /// Time limits for target access
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Desired-value overrides, parameter id -> value text
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,

    /// Where durable-config artifacts are installed
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl HosttuneConfig {
    /// Load config from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.host.validate()?;

        if self.timeouts.target_secs == 0 {
            bail!("timeouts.target_secs must be greater than zero");
        }

        if let Some(id) = self.disabled.iter().find(|id| id.trim().is_empty()) {
            bail!("disabled contains an empty parameter id: {id:?}");
        }

        Ok(())
    }

    /// Time limit for a single target access
    pub fn target_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.target_secs)
    }
}

// ============================================================================
// Host
// ============================================================================

/// Devices present on this host, used to expand per-device parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Block devices under /sys/block (e.g. "nvme0n1")
    #[serde(default)]
    pub block_devices: Vec<String>,

    /// Network interfaces (e.g. "enp5s0")
    #[serde(default)]
    pub network_interfaces: Vec<String>,

    /// ZFS pools (e.g. "tank")
    #[serde(default)]
    pub zfs_pools: Vec<String>,

    /// Accelerator indices as understood by nvidia-smi (e.g. "0")
    #[serde(default)]
    pub gpus: Vec<String>,

    /// CPU idle states to disable on every CPU (e.g. 2 for state2)
    #[serde(default)]
    pub cpu_idle_states: Vec<u32>,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    #[serde(default = "default_procfs_root")]
    pub procfs_root: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            block_devices: Vec::new(),
            network_interfaces: Vec::new(),
            zfs_pools: Vec::new(),
            gpus: Vec::new(),
            cpu_idle_states: Vec::new(),
            sysfs_root: default_sysfs_root(),
            procfs_root: default_procfs_root(),
        }
    }
}

fn default_sysfs_root() -> String {
    "/sys".to_string()
}

fn default_procfs_root() -> String {
    "/proc".to_string()
}

impl HostConfig {
    pub fn sysfs_root(&self) -> PathBuf {
        paths::expand(&self.sysfs_root)
    }

    pub fn procfs_root(&self) -> PathBuf {
        paths::expand(&self.procfs_root)
    }

    /// Validate device names
    pub fn validate(&self) -> Result<()> {
        for (field, names) in [
            ("block_devices", &self.block_devices),
            ("network_interfaces", &self.network_interfaces),
            ("zfs_pools", &self.zfs_pools),
            ("gpus", &self.gpus),
        ] {
            for name in names {
                if name.trim().is_empty() {
                    bail!("host.{field} contains an empty name");
                }
                if !reconcile::is_word(name) {
                    bail!("host.{field} entry {name:?} is not a device name");
                }
            }
        }

        if self.sysfs_root.trim().is_empty() || self.procfs_root.trim().is_empty() {
            bail!("host.sysfs_root and host.procfs_root cannot be empty");
        }

        Ok(())
    }
}

// ============================================================================
// Timeouts and persistence
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Seconds allowed for one read, write or management command
    #[serde(default = "default_target_secs")]
    pub target_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            target_secs: default_target_secs(),
        }
    }
}

fn default_target_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Prefix prepended to every artifact path
    #[serde(default = "default_persistence_root")]
    pub root: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root: default_persistence_root(),
        }
    }
}

fn default_persistence_root() -> String {
    "/".to_string()
}

impl PersistenceConfig {
    pub fn root(&self) -> PathBuf {
        paths::expand(&self.root)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = HosttuneConfig::load(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config.timeouts.target_secs, 5);
        assert_eq!(config.host.sysfs_root, "/sys");
        assert_eq!(config.persistence.root, "/");
        assert!(config.overrides.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
disabled = ["sched.numa_balancing"]

[host]
block_devices = ["nvme0n1", "sda"]
network_interfaces = ["enp5s0"]
zfs_pools = ["tank"]
gpus = ["0"]
cpu_idle_states = [2, 3]

[timeouts]
target_secs = 2

[overrides]
"mem.swappiness" = "1"

[persistence]
root = "/tmp/staging"
"#,
        )
        .unwrap();

        let config = HosttuneConfig::load(&path).unwrap();
        assert_eq!(config.host.block_devices, vec!["nvme0n1", "sda"]);
        assert_eq!(config.host.cpu_idle_states, vec![2, 3]);
        assert_eq!(config.target_timeout(), Duration::from_secs(2));
        assert_eq!(config.overrides["mem.swappiness"], "1");
        assert_eq!(config.disabled, vec!["sched.numa_balancing"]);
        assert_eq!(config.persistence.root(), PathBuf::from("/tmp/staging"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[timeouts]\ntarget_secs = 0\n").unwrap();
        assert!(HosttuneConfig::load(&path).is_err());
    }

    #[test]
    fn test_empty_device_name_rejected() {
        let mut config = HosttuneConfig::default();
        config.host.network_interfaces.push(String::new());
        assert!(config.validate().is_err());

        let mut config = HosttuneConfig::default();
        config.host.block_devices.push("../sda".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_names_with_shell_characters_rejected() {
        for name in ["sda;reboot", "eth0'", "nvme0n1\"", "$(id)", "en p5s0"] {
            let mut config = HosttuneConfig::default();
            config.host.network_interfaces.push(name.into());
            assert!(config.validate().is_err(), "{name} was accepted");
        }

        let mut config = HosttuneConfig::default();
        config.host.gpus.push("0000:01:00.0".into());
        config.host.block_devices.push("nvme0n1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[host\nblock_devices = 3").unwrap();
        assert!(HosttuneConfig::load(&path).is_err());
    }
}
