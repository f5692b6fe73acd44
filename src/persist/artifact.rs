//! Durable-config artifacts and their rendering

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::paths;

/// First line of every file hosttune writes
pub const MANAGED_HEADER: &str = "# Managed by hosttune; local edits are overwritten";

/// Prefix that identifies a managed file during discovery
pub const MANAGED_MARKER: &str = "# Managed by hosttune";

pub const SYSCTL_FILE: &str = "/etc/sysctl.d/90-hosttune.conf";
pub const UDEV_FILE: &str = "/etc/udev/rules.d/60-hosttune.rules";
pub const MODPROBE_DIR: &str = "/etc/modprobe.d";
pub const SYSTEMD_DIR: &str = "/etc/systemd/system";

/// File prefix shared by per-module and per-service artifacts
pub const FILE_PREFIX: &str = "hosttune-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    ServiceUnit,
    KeyValueFragment,
    DeviceRuleSet,
    ModuleParameterFragment,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ServiceUnit => "systemd unit",
            Self::KeyValueFragment => "sysctl drop-in",
            Self::DeviceRuleSet => "udev rules",
            Self::ModuleParameterFragment => "modprobe options",
        })
    }
}

/// A command line, program first
pub type Argv = Vec<String>;

fn argv(parts: &[&str]) -> Argv {
    parts.iter().map(ToString::to_string).collect()
}

/// A file that re-applies parameters at boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceArtifact {
    /// `sysctl`, `udev`, `modprobe:<module>` or `service:<slug>`
    pub id: String,
    pub kind: ArtifactKind,
    /// Absolute path, already placed under the configured root
    pub path: PathBuf,
    pub content: String,
    pub parameter_ids: Vec<String>,
    /// Run after the file is written
    pub activate: Vec<Argv>,
    /// Run before the file is removed
    pub deactivate: Vec<Argv>,
    /// Run after the file is removed
    pub after_removal: Vec<Argv>,
}

impl PersistenceArtifact {
    pub fn digest(&self) -> blake3::Hash {
        blake3::hash(self.content.as_bytes())
    }
}

/// Removal recipe for a managed file, planned or found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub id: String,
    pub path: PathBuf,
    pub deactivate: Vec<Argv>,
    pub after_removal: Vec<Argv>,
}

impl From<&PersistenceArtifact> for Removal {
    fn from(artifact: &PersistenceArtifact) -> Self {
        Self {
            id: artifact.id.clone(),
            path: artifact.path.clone(),
            deactivate: artifact.deactivate.clone(),
            after_removal: artifact.after_removal.clone(),
        }
    }
}

impl Removal {
    /// Rebuild the recipe for a managed file from its location alone
    pub fn for_path(root: &Path, path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_string();
        let (id, deactivate, after_removal) = if path == paths::under_root(root, SYSCTL_FILE) {
            ("sysctl".to_string(), Vec::new(), Vec::new())
        } else if path == paths::under_root(root, UDEV_FILE) {
            ("udev".to_string(), Vec::new(), udev_reload())
        } else if path.parent()? == paths::under_root(root, MODPROBE_DIR) {
            let module = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".conf")?;
            (format!("modprobe:{module}"), Vec::new(), Vec::new())
        } else if path.parent()? == paths::under_root(root, SYSTEMD_DIR) {
            let slug = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".service")?;
            (
                format!("service:{slug}"),
                unit_disable(&name),
                argv_list(&[&["systemctl", "daemon-reload"]]),
            )
        } else {
            return None;
        };

        Some(Self {
            id,
            path: path.to_path_buf(),
            deactivate,
            after_removal,
        })
    }
}

fn argv_list(commands: &[&[&str]]) -> Vec<Argv> {
    commands.iter().map(|c| argv(c)).collect()
}

fn udev_reload() -> Vec<Argv> {
    argv_list(&[&["udevadm", "control", "--reload-rules"]])
}

fn unit_disable(unit: &str) -> Vec<Argv> {
    argv_list(&[&["systemctl", "disable", unit]])
}

/// Turn a parameter id into a unit-name-safe slug (`mem.thp.enabled` -> `mem-thp-enabled`)
pub fn slug(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Parameter ids recorded in a rendered file by its `# <id>` owner lines
pub fn owners(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.starts_with(MANAGED_MARKER))
        .filter_map(|line| line.strip_prefix("# "))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && !id.contains(char::is_whitespace))
        .collect()
}

// ============================================================================
// Rendering
// ============================================================================

/// One `key = value` line with the parameter that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysctlLine {
    pub parameter_id: String,
    pub key: String,
    pub value: String,
}

pub fn render_sysctl(root: &Path, lines: &[SysctlLine]) -> PersistenceArtifact {
    let path = paths::under_root(root, SYSCTL_FILE);
    let mut content = format!("{MANAGED_HEADER}\n");
    for line in lines {
        content.push_str(&format!("# {}\n{} = {}\n", line.parameter_id, line.key, line.value));
    }

    PersistenceArtifact {
        id: "sysctl".to_string(),
        kind: ArtifactKind::KeyValueFragment,
        activate: vec![argv(&["sysctl", "-p", &path.to_string_lossy()])],
        path,
        content,
        parameter_ids: lines.iter().map(|l| l.parameter_id.clone()).collect(),
        deactivate: Vec::new(),
        after_removal: Vec::new(),
    }
}

/// One attribute assignment for one kernel device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdevRule {
    pub parameter_id: String,
    pub subsystem: String,
    pub kernel: String,
    pub attribute: String,
    pub value: String,
}

pub fn render_udev(root: &Path, rules: &[UdevRule]) -> PersistenceArtifact {
    let mut content = format!("{MANAGED_HEADER}\n");
    let mut subsystems: Vec<&str> = Vec::new();
    for rule in rules {
        content.push_str(&format!(
            "# {}\nACTION==\"add|change\", SUBSYSTEM==\"{}\", KERNEL==\"{}\", ATTR{{{}}}=\"{}\"\n",
            rule.parameter_id, rule.subsystem, rule.kernel, rule.attribute, rule.value
        ));
        if !subsystems.contains(&rule.subsystem.as_str()) {
            subsystems.push(&rule.subsystem);
        }
    }

    let mut activate = udev_reload();
    for subsystem in subsystems {
        activate.push(argv(&[
            "udevadm",
            "trigger",
            &format!("--subsystem-match={subsystem}"),
        ]));
    }

    PersistenceArtifact {
        id: "udev".to_string(),
        kind: ArtifactKind::DeviceRuleSet,
        path: paths::under_root(root, UDEV_FILE),
        content,
        parameter_ids: rules.iter().map(|r| r.parameter_id.clone()).collect(),
        activate,
        deactivate: Vec::new(),
        after_removal: udev_reload(),
    }
}

/// One `option=value` for a kernel module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOption {
    pub parameter_id: String,
    pub option: String,
    pub value: String,
}

/// Options take effect the next time the module loads; nothing to activate
pub fn render_modprobe(root: &Path, module: &str, options: &[ModuleOption]) -> PersistenceArtifact {
    let mut content = format!("{MANAGED_HEADER}\n");
    for option in options {
        content.push_str(&format!("# {}\n", option.parameter_id));
    }
    let assignments: Vec<String> = options
        .iter()
        .map(|o| format!("{}={}", o.option, o.value))
        .collect();
    content.push_str(&format!("options {} {}\n", module, assignments.join(" ")));

    PersistenceArtifact {
        id: format!("modprobe:{module}"),
        kind: ArtifactKind::ModuleParameterFragment,
        path: paths::under_root(root, MODPROBE_DIR).join(format!("{FILE_PREFIX}{module}.conf")),
        content,
        parameter_ids: options.iter().map(|o| o.parameter_id.clone()).collect(),
        activate: Vec::new(),
        deactivate: Vec::new(),
        after_removal: Vec::new(),
    }
}

/// Oneshot unit that runs `command` once per boot
pub fn render_service(
    root: &Path,
    parameter_id: &str,
    description: &str,
    command: &str,
) -> PersistenceArtifact {
    let slug = slug(parameter_id);
    let unit = format!("{FILE_PREFIX}{slug}.service");
    let quoted = command.replace('\'', r"'\''");
    let content = format!(
        "{MANAGED_HEADER}
[Unit]
Description=hosttune: {description} ({parameter_id})
After=systemd-modules-load.service

[Service]
Type=oneshot
RemainAfterExit=yes
ExecStart=/bin/sh -c '{quoted}'

[Install]
WantedBy=multi-user.target
"
    );

    PersistenceArtifact {
        id: format!("service:{slug}"),
        kind: ArtifactKind::ServiceUnit,
        path: paths::under_root(root, SYSTEMD_DIR).join(&unit),
        content,
        parameter_ids: vec![parameter_id.to_string()],
        activate: argv_list(&[&["systemctl", "daemon-reload"], &["systemctl", "enable", &unit]]),
        deactivate: unit_disable(&unit),
        after_removal: argv_list(&[&["systemctl", "daemon-reload"]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysctl_render_and_activation() {
        let artifact = render_sysctl(
            Path::new("/"),
            &[SysctlLine {
                parameter_id: "mem.swappiness".into(),
                key: "vm.swappiness".into(),
                value: "10".into(),
            }],
        );
        assert_eq!(artifact.path, PathBuf::from(SYSCTL_FILE));
        assert!(artifact.content.starts_with(MANAGED_HEADER));
        assert!(artifact.content.contains("vm.swappiness = 10\n"));
        assert_eq!(
            artifact.activate,
            vec![argv(&["sysctl", "-p", "/etc/sysctl.d/90-hosttune.conf"])]
        );
    }

    #[test]
    fn test_udev_triggers_each_subsystem_once() {
        let rule = |dev: &str| UdevRule {
            parameter_id: format!("io.{dev}.scheduler"),
            subsystem: "block".into(),
            kernel: dev.into(),
            attribute: "queue/scheduler".into(),
            value: "none".into(),
        };
        let artifact = render_udev(Path::new("/"), &[rule("sda"), rule("nvme0n1")]);
        assert!(artifact.content.contains(
            "ACTION==\"add|change\", SUBSYSTEM==\"block\", KERNEL==\"sda\", ATTR{queue/scheduler}=\"none\""
        ));
        assert_eq!(artifact.activate.len(), 2);
        assert_eq!(artifact.activate[1][2], "--subsystem-match=block");
    }

    #[test]
    fn test_modprobe_single_options_line() {
        let artifact = render_modprobe(
            Path::new("/tmp/root"),
            "zfs",
            &[
                ModuleOption {
                    parameter_id: "zfs.arc_max".into(),
                    option: "zfs_arc_max".into(),
                    value: "17179869184".into(),
                },
                ModuleOption {
                    parameter_id: "zfs.arc_min".into(),
                    option: "zfs_arc_min".into(),
                    value: "4294967296".into(),
                },
            ],
        );
        assert_eq!(
            artifact.path,
            PathBuf::from("/tmp/root/etc/modprobe.d/hosttune-zfs.conf")
        );
        assert!(
            artifact
                .content
                .ends_with("options zfs zfs_arc_max=17179869184 zfs_arc_min=4294967296\n")
        );
        assert!(artifact.activate.is_empty());
    }

    #[test]
    fn test_service_unit_quotes_command() {
        let artifact = render_service(
            Path::new("/"),
            "mem.thp.enabled",
            "Transparent hugepage policy",
            "echo always > /sys/kernel/mm/transparent_hugepage/enabled",
        );
        assert_eq!(artifact.id, "service:mem-thp-enabled");
        assert!(artifact.content.contains(
            "ExecStart=/bin/sh -c 'echo always > /sys/kernel/mm/transparent_hugepage/enabled'"
        ));
        assert_eq!(
            artifact.activate[1],
            argv(&["systemctl", "enable", "hosttune-mem-thp-enabled.service"])
        );
        assert_eq!(
            artifact.deactivate,
            vec![argv(&["systemctl", "disable", "hosttune-mem-thp-enabled.service"])]
        );
    }

    #[test]
    fn test_owners_read_back_from_rendered_files() {
        let root = Path::new("/");
        let drop_in = render_sysctl(
            root,
            &[
                SysctlLine {
                    parameter_id: "mem.swappiness".into(),
                    key: "vm.swappiness".into(),
                    value: "10".into(),
                },
                SysctlLine {
                    parameter_id: "mem.dirty_ratio".into(),
                    key: "vm.dirty_ratio".into(),
                    value: "10".into(),
                },
            ],
        );
        assert_eq!(owners(&drop_in.content), drop_in.parameter_ids);

        let modprobe = render_modprobe(
            root,
            "zfs",
            &[ModuleOption {
                parameter_id: "zfs.arc_max".into(),
                option: "zfs_arc_max".into(),
                value: "1".into(),
            }],
        );
        assert_eq!(owners(&modprobe.content), vec!["zfs.arc_max"]);

        let unit = render_service(root, "mem.thp.enabled", "thp", "true");
        assert!(owners(&unit.content).is_empty());
    }

    #[test]
    fn test_removal_for_path_matches_planned_recipe() {
        let root = Path::new("/tmp/root");
        let artifact = render_service(root, "nic.enp5s0.ring.rx", "ring", "ethtool -G enp5s0 rx 4096");
        let found = Removal::for_path(root, &artifact.path).unwrap();
        assert_eq!(found, Removal::from(&artifact));

        let udev = render_udev(root, &[]);
        assert_eq!(
            Removal::for_path(root, &udev.path).unwrap(),
            Removal::from(&udev)
        );

        assert!(Removal::for_path(root, Path::new("/tmp/root/etc/fstab")).is_none());
    }
}
