//! Boot-time persistence
//!
//! Live writes do not survive a reboot. For each selected parameter this
//! module plans the durable-config artifact that re-applies its desired
//! value at boot, and installs or removes those artifacts under a
//! configurable root. Parameters with no durable mechanism are reported,
//! never silently skipped.

mod artifact;
mod install;

pub use artifact::{PersistenceArtifact, Removal};
pub use install::{
    ArtifactAction, ArtifactResult, ArtifactStatus, discover, install, installed_parameters,
    show_diff, status, uninstall,
};

use reconcile::{Mechanism, Parameter};
use serde::Serialize;
use std::path::Path;

use artifact::{ModuleOption, SysctlLine, UdevRule};

/// What persistence means for one parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum PlanEntry {
    /// Covered by the named artifact
    Artifact { artifact_id: String },
    /// The target already keeps its value
    Native,
    /// Nothing can re-apply this value at boot
    NotDurable { reason: String },
}

/// Artifacts plus an explicit verdict for every selected parameter
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistencePlan {
    pub artifacts: Vec<PersistenceArtifact>,
    /// (parameter id, verdict), in selection order
    pub entries: Vec<(String, PlanEntry)>,
}

impl PersistencePlan {
    pub fn native(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| *e == PlanEntry::Native)
            .map(|(id, _)| id.as_str())
    }

    pub fn not_durable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(id, e)| match e {
            PlanEntry::NotDurable { reason } => Some((id.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// Plan the artifacts that re-apply each parameter's desired value at boot
///
/// Sysctl keys share one drop-in, device rules share one rules file, module
/// options share one file per module, and each boot command gets its own
/// oneshot unit. Artifacts appear in the order their first parameter does.
pub fn plan(parameters: &[&Parameter], root: &Path) -> PersistencePlan {
    let mut sysctl = Vec::new();
    let mut udev = Vec::new();
    let mut modules: Vec<(String, Vec<ModuleOption>)> = Vec::new();
    let mut services = Vec::new();
    let mut entries = Vec::new();
    // Artifact ids in first-use order
    let mut order: Vec<String> = Vec::new();

    for p in parameters {
        let value = p.desired_value.to_string();
        let entry = match &p.mechanism {
            Mechanism::None { reason } => PlanEntry::NotDurable {
                reason: reason.clone(),
            },
            Mechanism::Native => PlanEntry::Native,
            Mechanism::Sysctl { key } => {
                sysctl.push(SysctlLine {
                    parameter_id: p.id.clone(),
                    key: key.clone(),
                    value,
                });
                artifact_entry("sysctl".to_string(), &mut order)
            }
            Mechanism::DeviceRule {
                subsystem,
                kernel,
                attribute,
            } => {
                udev.push(UdevRule {
                    parameter_id: p.id.clone(),
                    subsystem: subsystem.clone(),
                    kernel: kernel.clone(),
                    attribute: attribute.clone(),
                    value,
                });
                artifact_entry("udev".to_string(), &mut order)
            }
            Mechanism::ModuleOption { module, option } => {
                let option = ModuleOption {
                    parameter_id: p.id.clone(),
                    option: option.clone(),
                    value,
                };
                match modules.iter_mut().find(|(m, _)| m == module) {
                    Some((_, options)) => options.push(option),
                    None => modules.push((module.clone(), vec![option])),
                }
                artifact_entry(format!("modprobe:{module}"), &mut order)
            }
            Mechanism::BootService { command } => {
                let rendered = artifact::render_service(
                    root,
                    &p.id,
                    &p.description,
                    &command.replace("{value}", &value),
                );
                let entry = artifact_entry(rendered.id.clone(), &mut order);
                services.push(rendered);
                entry
            }
        };
        entries.push((p.id.clone(), entry));
    }

    let mut built = services;
    if !sysctl.is_empty() {
        built.push(artifact::render_sysctl(root, &sysctl));
    }
    if !udev.is_empty() {
        built.push(artifact::render_udev(root, &udev));
    }
    for (module, options) in &modules {
        built.push(artifact::render_modprobe(root, module, options));
    }

    let mut artifacts = Vec::with_capacity(built.len());
    for id in &order {
        if let Some(index) = built.iter().position(|a| &a.id == id) {
            artifacts.push(built.swap_remove(index));
        }
    }

    log::debug!(
        "Planned {} artifacts for {} parameters",
        artifacts.len(),
        parameters.len()
    );
    PersistencePlan { artifacts, entries }
}

/// Plan installing `selected` on top of what is already installed
///
/// Shared files keep every parameter they carry today (`installed`) and gain
/// the selected ones. Only files the selection touches are planned; `all` is
/// the registry in declaration order, which fixes the line order.
pub fn plan_install(
    all: &[&Parameter],
    selected: &[&Parameter],
    installed: &[String],
    root: &Path,
) -> PersistencePlan {
    let wanted = plan(selected, root);
    let members = members_of(all, |id| {
        is_selected(selected, id) || installed.iter().any(|i| i == id)
    });
    let artifacts = plan(&members, root)
        .artifacts
        .into_iter()
        .filter(|a| wanted.artifacts.iter().any(|w| w.id == a.id))
        .collect();

    PersistencePlan {
        artifacts,
        entries: wanted.entries,
    }
}

/// Files to remove and shared files to rewrite when `selected` is uninstalled
///
/// A shared file keeps only the installed parameters outside the selection;
/// it is never widened to parameters that were not installed.
pub fn plan_uninstall(
    all: &[&Parameter],
    selected: &[&Parameter],
    installed: &[String],
    root: &Path,
) -> (Vec<Removal>, Vec<PersistenceArtifact>) {
    let remaining = members_of(all, |id| {
        !is_selected(selected, id) && installed.iter().any(|i| i == id)
    });
    narrow(&plan(selected, root), &plan(&remaining, root))
}

fn is_selected(selected: &[&Parameter], id: &str) -> bool {
    selected.iter().any(|p| p.id == id)
}

fn members_of<'a>(all: &[&'a Parameter], keep: impl Fn(&str) -> bool) -> Vec<&'a Parameter> {
    all.iter().copied().filter(|p| keep(p.id.as_str())).collect()
}

/// Split the artifacts of `selected` into files to remove and files to rewrite
///
/// `remaining` is the plan for every parameter that stays persisted. An
/// artifact it still needs is rewritten without the selected parameters
/// rather than removed.
fn narrow(
    selected: &PersistencePlan,
    remaining: &PersistencePlan,
) -> (Vec<Removal>, Vec<PersistenceArtifact>) {
    let mut removals = Vec::new();
    let mut rewrites = Vec::new();
    for artifact in &selected.artifacts {
        match remaining.artifacts.iter().find(|a| a.id == artifact.id) {
            Some(shared) => rewrites.push(shared.clone()),
            None => removals.push(Removal::from(artifact)),
        }
    }
    (removals, rewrites)
}

fn artifact_entry(id: String, order: &mut Vec<String>) -> PlanEntry {
    if !order.contains(&id) {
        order.push(id.clone());
    }
    PlanEntry::Artifact { artifact_id: id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::ScriptedRunner;
    use reconcile::{Category, Encoding, Reading, Target, TargetError, Value};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Nowhere;

    impl Target for Nowhere {
        fn location(&self) -> String {
            "nowhere".into()
        }
        fn read(&self) -> Result<Reading, TargetError> {
            Ok(Reading::Absent)
        }
        fn write(&self, _raw: &str) -> Result<(), TargetError> {
            Ok(())
        }
    }

    fn param(id: &str, desired: Value, mechanism: Mechanism) -> Parameter {
        let encoding = match desired {
            Value::Int(_) => Encoding::Integer,
            Value::Pair(..) => Encoding::CommaPair,
            _ => Encoding::EnumString,
        };
        Parameter::new(
            id,
            Category::Memory,
            Box::new(Nowhere),
            encoding,
            desired.clone(),
            desired,
        )
        .with_description(id)
        .persisted_by(mechanism)
    }

    fn sysctl(id: &str, key: &str, v: i64) -> Parameter {
        param(id, Value::Int(v), Mechanism::Sysctl { key: key.into() })
    }

    #[test]
    fn test_sysctl_parameters_share_one_drop_in() {
        let a = sysctl("mem.swappiness", "vm.swappiness", 10);
        let b = sysctl("net.core.rmem_max", "net.core.rmem_max", 16_777_216);
        let plan = plan(&[&a, &b], Path::new("/"));

        assert_eq!(plan.artifacts.len(), 1);
        let drop_in = &plan.artifacts[0];
        assert_eq!(drop_in.path, PathBuf::from("/etc/sysctl.d/90-hosttune.conf"));
        assert!(drop_in.content.contains("vm.swappiness = 10"));
        assert!(drop_in.content.contains("net.core.rmem_max = 16777216"));
        assert_eq!(drop_in.parameter_ids, vec!["mem.swappiness", "net.core.rmem_max"]);
    }

    #[test]
    fn test_every_parameter_gets_a_verdict() {
        let a = sysctl("mem.swappiness", "vm.swappiness", 10);
        let pool = param("pool.tank.autotrim", Value::Word("on".into()), Mechanism::Native);
        let clocks = param(
            "gpu.0.application_clocks",
            Value::Pair(9501, 1695),
            Mechanism::None {
                reason: "reset on reload".into(),
            },
        );
        let plan = plan(&[&a, &pool, &clocks], Path::new("/"));

        assert_eq!(plan.entries.len(), 3);
        assert_eq!(plan.native().collect::<Vec<_>>(), vec!["pool.tank.autotrim"]);
        assert_eq!(
            plan.not_durable().collect::<Vec<_>>(),
            vec![("gpu.0.application_clocks", "reset on reload")]
        );
        assert_eq!(plan.artifacts.len(), 1);
    }

    #[test]
    fn test_boot_service_substitutes_desired_value() {
        let thp = param(
            "mem.thp.enabled",
            Value::Word("always".into()),
            Mechanism::BootService {
                command: "echo {value} > /sys/kernel/mm/transparent_hugepage/enabled".into(),
            },
        );
        let plan = plan(&[&thp], Path::new("/srv/image"));
        let unit = &plan.artifacts[0];
        assert_eq!(
            unit.path,
            PathBuf::from("/srv/image/etc/systemd/system/hosttune-mem-thp-enabled.service")
        );
        assert!(unit.content.contains("echo always > /sys/kernel"));
    }

    #[test]
    fn test_module_options_group_by_module_in_first_use_order() {
        let module = |id: &str, option: &str, v: i64| {
            param(
                id,
                Value::Int(v),
                Mechanism::ModuleOption {
                    module: "zfs".into(),
                    option: option.into(),
                },
            )
        };
        let max = module("zfs.arc_max", "zfs_arc_max", 100);
        let swap = sysctl("mem.swappiness", "vm.swappiness", 10);
        let min = module("zfs.arc_min", "zfs_arc_min", 50);

        let plan = plan(&[&max, &swap, &min], Path::new("/"));
        let ids: Vec<&str> = plan.artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["modprobe:zfs", "sysctl"]);
        assert!(
            plan.artifacts[0]
                .content
                .contains("options zfs zfs_arc_max=100 zfs_arc_min=50")
        );
    }

    #[test]
    fn test_narrow_rewrites_shared_and_removes_exclusive() {
        let swap = sysctl("mem.swappiness", "vm.swappiness", 10);
        let rmem = sysctl("net.core.rmem_max", "net.core.rmem_max", 1);
        let thp = param(
            "mem.thp.enabled",
            Value::Word("always".into()),
            Mechanism::BootService {
                command: "echo {value}".into(),
            },
        );
        let root = Path::new("/");
        let selected = plan(&[&swap, &thp], root);
        let remaining = plan(&[&rmem], root);

        let (removals, rewrites) = narrow(&selected, &remaining);
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].id, "service:mem-thp-enabled");
        assert_eq!(rewrites.len(), 1);
        assert!(!rewrites[0].content.contains("vm.swappiness"));
        assert!(rewrites[0].content.contains("net.core.rmem_max = 1"));
    }

    fn memory_and_network() -> Vec<Parameter> {
        vec![
            sysctl("mem.swappiness", "vm.swappiness", 10),
            sysctl("mem.dirty_ratio", "vm.dirty_ratio", 10),
            sysctl("net.core.rmem_max", "net.core.rmem_max", 16_777_216),
            param(
                "mem.thp.enabled",
                Value::Word("always".into()),
                Mechanism::BootService {
                    command: "echo {value}".into(),
                },
            ),
        ]
    }

    #[test]
    fn test_install_of_one_parameter_keeps_installed_neighbours() {
        let params = memory_and_network();
        let all: Vec<&Parameter> = params.iter().collect();
        let installed = vec!["mem.swappiness".to_string(), "mem.dirty_ratio".to_string()];

        let plan = plan_install(&all, &[all[0]], &installed, Path::new("/"));

        assert_eq!(plan.artifacts.len(), 1);
        assert_eq!(
            plan.artifacts[0].parameter_ids,
            vec!["mem.swappiness", "mem.dirty_ratio"]
        );
        assert!(!plan.artifacts[0].content.contains("rmem_max"));
        assert_eq!(plan.entries.len(), 1);
    }

    #[test]
    fn test_install_adds_to_shared_file_without_touching_other_artifacts() {
        let params = memory_and_network();
        let all: Vec<&Parameter> = params.iter().collect();
        let installed = vec!["mem.swappiness".to_string(), "mem.thp.enabled".to_string()];

        let plan = plan_install(&all, &[all[2]], &installed, Path::new("/"));

        let ids: Vec<&str> = plan.artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["sysctl"]);
        assert_eq!(
            plan.artifacts[0].parameter_ids,
            vec!["mem.swappiness", "net.core.rmem_max"]
        );
    }

    #[test]
    fn test_uninstall_of_one_parameter_never_adds_uninstalled_ones() {
        let params = memory_and_network();
        let all: Vec<&Parameter> = params.iter().collect();
        let installed = vec!["mem.swappiness".to_string(), "mem.dirty_ratio".to_string()];

        let (removals, rewrites) = plan_uninstall(&all, &[all[0]], &installed, Path::new("/"));

        assert!(removals.is_empty());
        assert_eq!(rewrites.len(), 1);
        assert_eq!(rewrites[0].parameter_ids, vec!["mem.dirty_ratio"]);
        assert!(!rewrites[0].content.contains("rmem_max"));
    }

    #[test]
    fn test_uninstall_of_last_owner_removes_the_file() {
        let params = memory_and_network();
        let all: Vec<&Parameter> = params.iter().collect();
        let installed = vec!["mem.swappiness".to_string()];

        let (removals, rewrites) =
            plan_uninstall(&all, &[all[0], all[3]], &installed, Path::new("/"));

        let ids: Vec<&str> = removals.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["sysctl", "service:mem-thp-enabled"]);
        assert!(rewrites.is_empty());
    }

    #[test]
    fn test_filtered_install_then_uninstall_on_disk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let runner = ScriptedRunner::new();
        let params = memory_and_network();
        let all: Vec<&Parameter> = params.iter().collect();
        let memory = [all[0], all[1]];

        let first = plan_install(&all, &memory, &installed_parameters(root), root);
        install(&first.artifacts, &runner, false);

        let again = plan_install(&all, &[all[0]], &installed_parameters(root), root);
        let results = install(&again.artifacts, &runner, false);
        assert_eq!(results[0].action, ArtifactAction::Unchanged);

        let (removals, rewrites) =
            plan_uninstall(&all, &[all[0]], &installed_parameters(root), root);
        uninstall(&removals, &runner, false);
        install(&rewrites, &runner, false);

        assert_eq!(installed_parameters(root), vec!["mem.dirty_ratio"]);
        let drop_in = std::fs::read_to_string(&rewrites[0].path).unwrap();
        assert!(drop_in.contains("vm.dirty_ratio = 10"));
        assert!(!drop_in.contains("vm.swappiness"));
        assert!(!drop_in.contains("rmem_max"));
    }

    #[test]
    fn test_empty_selection_plans_nothing() {
        let plan = plan(&[], Path::new("/"));
        assert!(plan.artifacts.is_empty());
        assert!(plan.entries.is_empty());
    }
}
