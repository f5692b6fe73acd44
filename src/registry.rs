//! Parameter registry
//!
//! Built once at startup from [`TABLE`] expanded against the `[host]`
//! section of the configuration. Order is table order, then host-config
//! order within a per-device entry. The registry never changes afterwards.

use reconcile::{
    Category, CommandRunner, Encoding, InvalidParameter, Mechanism, Parameter, Target, Value,
    ValueError,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::HosttuneConfig;
use crate::targets::{
    FileSet, GpuField, GpuSetting, PoolProperty, RingBuffer, RingDirection, VirtualFile,
};

/// Registry construction and lookup failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown parameter: {0}")]
    NotFound(String),

    #[error("{field} names unknown parameter {id:?}")]
    UnknownId { field: &'static str, id: String },

    #[error("override for {id} is not valid: {source}")]
    BadOverride {
        id: String,
        #[source]
        source: ValueError,
    },

    #[error("parameter {0} is declared twice")]
    Duplicate(String),

    #[error(transparent)]
    Invalid(#[from] InvalidParameter),
}

// ============================================================================
// Declarative table
// ============================================================================

/// What a table entry is expanded over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Host,
    BlockDevice,
    Interface,
    Pool,
    Gpu,
    CpuIdleState,
}

impl Scope {
    fn placeholder(self) -> Option<&'static str> {
        match self {
            Self::Host => None,
            Self::BlockDevice => Some("{dev}"),
            Self::Interface => Some("{iface}"),
            Self::Pool => Some("{pool}"),
            Self::Gpu => Some("{gpu}"),
            Self::CpuIdleState => Some("{state}"),
        }
    }
}

/// Where the live value lives
#[derive(Debug, Clone, Copy)]
enum Source {
    /// Path below the procfs root
    Proc(&'static str),
    /// Path below the sysfs root
    Sys(&'static str),
    /// `cpuN/<relative>` for every CPU below the sysfs cpu directory
    EveryCpu(&'static str),
    PoolProperty(&'static str),
    Ring(RingDirection),
    Gpu(GpuField),
}

/// How the value is re-applied at boot
#[derive(Debug, Clone, Copy)]
enum Durable {
    Nothing(&'static str),
    Native,
    Sysctl(&'static str),
    ModuleOption {
        module: &'static str,
        option: &'static str,
    },
    DeviceRule {
        subsystem: &'static str,
        kernel: &'static str,
        attribute: &'static str,
    },
    BootService(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: &'static str,
    category: Category,
    description: &'static str,
    scope: Scope,
    source: Source,
    encoding: Encoding,
    desired: &'static str,
    default: &'static str,
    optional: bool,
    durable: Durable,
}

/// Every tunable hosttune knows about, in reconciliation order
static TABLE: &[Entry] = &[
    // Memory
    Entry {
        id: "mem.swappiness",
        category: Category::Memory,
        description: "Prefer dropping page cache over swapping anonymous memory",
        scope: Scope::Host,
        source: Source::Proc("sys/vm/swappiness"),
        encoding: Encoding::Integer,
        desired: "10",
        default: "60",
        optional: false,
        durable: Durable::Sysctl("vm.swappiness"),
    },
    Entry {
        id: "mem.vfs_cache_pressure",
        category: Category::Memory,
        description: "Keep dentry and inode caches longer",
        scope: Scope::Host,
        source: Source::Proc("sys/vm/vfs_cache_pressure"),
        encoding: Encoding::Integer,
        desired: "50",
        default: "100",
        optional: false,
        durable: Durable::Sysctl("vm.vfs_cache_pressure"),
    },
    Entry {
        id: "mem.dirty_ratio",
        category: Category::Memory,
        description: "Percent of memory dirty before writers block",
        scope: Scope::Host,
        source: Source::Proc("sys/vm/dirty_ratio"),
        encoding: Encoding::Integer,
        desired: "10",
        default: "20",
        optional: false,
        durable: Durable::Sysctl("vm.dirty_ratio"),
    },
    Entry {
        id: "mem.dirty_background_ratio",
        category: Category::Memory,
        description: "Percent of memory dirty before background writeback",
        scope: Scope::Host,
        source: Source::Proc("sys/vm/dirty_background_ratio"),
        encoding: Encoding::Integer,
        desired: "5",
        default: "10",
        optional: false,
        durable: Durable::Sysctl("vm.dirty_background_ratio"),
    },
    Entry {
        id: "mem.thp.enabled",
        category: Category::Memory,
        description: "Transparent hugepage policy",
        scope: Scope::Host,
        source: Source::Sys("kernel/mm/transparent_hugepage/enabled"),
        encoding: Encoding::EnumString,
        desired: "always",
        default: "madvise",
        optional: true,
        durable: Durable::BootService("echo {value} > /sys/kernel/mm/transparent_hugepage/enabled"),
    },
    Entry {
        id: "mem.thp.defrag",
        category: Category::Memory,
        description: "Transparent hugepage defragmentation policy",
        scope: Scope::Host,
        source: Source::Sys("kernel/mm/transparent_hugepage/defrag"),
        encoding: Encoding::EnumString,
        desired: "defer+madvise",
        default: "madvise",
        optional: true,
        durable: Durable::BootService("echo {value} > /sys/kernel/mm/transparent_hugepage/defrag"),
    },
    // Block I/O
    Entry {
        id: "io.{dev}.scheduler",
        category: Category::Io,
        description: "I/O scheduler",
        scope: Scope::BlockDevice,
        source: Source::Sys("block/{dev}/queue/scheduler"),
        encoding: Encoding::EnumString,
        desired: "none",
        default: "mq-deadline",
        optional: true,
        durable: Durable::DeviceRule {
            subsystem: "block",
            kernel: "{dev}",
            attribute: "queue/scheduler",
        },
    },
    Entry {
        id: "io.{dev}.nr_requests",
        category: Category::Io,
        description: "Request queue depth",
        scope: Scope::BlockDevice,
        source: Source::Sys("block/{dev}/queue/nr_requests"),
        encoding: Encoding::Integer,
        desired: "1024",
        default: "256",
        optional: true,
        durable: Durable::DeviceRule {
            subsystem: "block",
            kernel: "{dev}",
            attribute: "queue/nr_requests",
        },
    },
    Entry {
        id: "io.{dev}.read_ahead_kb",
        category: Category::Io,
        description: "Read-ahead window in KiB",
        scope: Scope::BlockDevice,
        source: Source::Sys("block/{dev}/queue/read_ahead_kb"),
        encoding: Encoding::Integer,
        desired: "2048",
        default: "128",
        optional: true,
        durable: Durable::DeviceRule {
            subsystem: "block",
            kernel: "{dev}",
            attribute: "queue/read_ahead_kb",
        },
    },
    // Storage pool
    Entry {
        id: "zfs.arc_max",
        category: Category::StoragePool,
        description: "ZFS ARC upper bound in bytes",
        scope: Scope::Host,
        source: Source::Sys("module/zfs/parameters/zfs_arc_max"),
        encoding: Encoding::Integer,
        desired: "17179869184",
        default: "0",
        optional: true,
        durable: Durable::ModuleOption {
            module: "zfs",
            option: "zfs_arc_max",
        },
    },
    Entry {
        id: "zfs.arc_min",
        category: Category::StoragePool,
        description: "ZFS ARC lower bound in bytes",
        scope: Scope::Host,
        source: Source::Sys("module/zfs/parameters/zfs_arc_min"),
        encoding: Encoding::Integer,
        desired: "4294967296",
        default: "0",
        optional: true,
        durable: Durable::ModuleOption {
            module: "zfs",
            option: "zfs_arc_min",
        },
    },
    Entry {
        id: "pool.{pool}.autotrim",
        category: Category::StoragePool,
        description: "Continuous TRIM on the pool",
        scope: Scope::Pool,
        source: Source::PoolProperty("autotrim"),
        encoding: Encoding::EnumString,
        desired: "on",
        default: "off",
        optional: false,
        durable: Durable::Native,
    },
    // Network
    Entry {
        id: "net.core.rmem_max",
        category: Category::Network,
        description: "Maximum socket receive buffer",
        scope: Scope::Host,
        source: Source::Proc("sys/net/core/rmem_max"),
        encoding: Encoding::Integer,
        desired: "16777216",
        default: "212992",
        optional: false,
        durable: Durable::Sysctl("net.core.rmem_max"),
    },
    Entry {
        id: "net.core.wmem_max",
        category: Category::Network,
        description: "Maximum socket send buffer",
        scope: Scope::Host,
        source: Source::Proc("sys/net/core/wmem_max"),
        encoding: Encoding::Integer,
        desired: "16777216",
        default: "212992",
        optional: false,
        durable: Durable::Sysctl("net.core.wmem_max"),
    },
    Entry {
        id: "net.core.netdev_max_backlog",
        category: Category::Network,
        description: "Packets queued on input before dropping",
        scope: Scope::Host,
        source: Source::Proc("sys/net/core/netdev_max_backlog"),
        encoding: Encoding::Integer,
        desired: "5000",
        default: "1000",
        optional: false,
        durable: Durable::Sysctl("net.core.netdev_max_backlog"),
    },
    Entry {
        id: "nic.{iface}.ring.rx",
        category: Category::Network,
        description: "NIC receive ring size",
        scope: Scope::Interface,
        source: Source::Ring(RingDirection::Rx),
        encoding: Encoding::Integer,
        desired: "4096",
        default: "1024",
        optional: true,
        durable: Durable::BootService("ethtool -G {iface} rx {value}"),
    },
    Entry {
        id: "nic.{iface}.ring.tx",
        category: Category::Network,
        description: "NIC transmit ring size",
        scope: Scope::Interface,
        source: Source::Ring(RingDirection::Tx),
        encoding: Encoding::Integer,
        desired: "4096",
        default: "1024",
        optional: true,
        durable: Durable::BootService("ethtool -G {iface} tx {value}"),
    },
    // Scheduler
    Entry {
        id: "sched.autogroup",
        category: Category::Scheduler,
        description: "Automatic per-session task grouping",
        scope: Scope::Host,
        source: Source::Proc("sys/kernel/sched_autogroup_enabled"),
        encoding: Encoding::Integer,
        desired: "0",
        default: "1",
        optional: true,
        durable: Durable::Sysctl("kernel.sched_autogroup_enabled"),
    },
    Entry {
        id: "sched.numa_balancing",
        category: Category::Scheduler,
        description: "Automatic NUMA page migration",
        scope: Scope::Host,
        source: Source::Proc("sys/kernel/numa_balancing"),
        encoding: Encoding::Integer,
        desired: "0",
        default: "1",
        optional: true,
        durable: Durable::Sysctl("kernel.numa_balancing"),
    },
    // Accelerator mode
    Entry {
        id: "gpu.{gpu}.persistence_mode",
        category: Category::AcceleratorMode,
        description: "Keep the driver loaded with no clients",
        scope: Scope::Gpu,
        source: Source::Gpu(GpuField::PersistenceMode),
        encoding: Encoding::EnumString,
        desired: "Enabled",
        default: "Disabled",
        optional: true,
        durable: Durable::BootService("nvidia-smi -i {gpu} -pm {value}"),
    },
    Entry {
        id: "gpu.{gpu}.accounting_mode",
        category: Category::AcceleratorMode,
        description: "Per-process accounting",
        scope: Scope::Gpu,
        source: Source::Gpu(GpuField::AccountingMode),
        encoding: Encoding::EnumString,
        desired: "Enabled",
        default: "Disabled",
        optional: true,
        durable: Durable::BootService("nvidia-smi -i {gpu} -am {value}"),
    },
    // Accelerator clocks
    Entry {
        id: "gpu.{gpu}.power_limit",
        category: Category::AcceleratorClock,
        description: "Board power limit in watts",
        scope: Scope::Gpu,
        source: Source::Gpu(GpuField::PowerLimit),
        encoding: Encoding::Integer,
        desired: "300",
        default: "350",
        optional: true,
        durable: Durable::BootService("nvidia-smi -i {gpu} -pl {value}"),
    },
    Entry {
        id: "gpu.{gpu}.application_clocks",
        category: Category::AcceleratorClock,
        description: "Application clock lock (memory,graphics MHz)",
        scope: Scope::Gpu,
        source: Source::Gpu(GpuField::ApplicationClocks),
        encoding: Encoding::CommaPair,
        desired: "9501,1695",
        default: "9501,1395",
        optional: true,
        durable: Durable::Nothing(
            "clock lock is reset by the driver on reload and firmware ignores boot-time locks",
        ),
    },
    // CPU idle
    Entry {
        id: "cpu.idle.state{state}.disable",
        category: Category::CpuIdle,
        description: "Disable a deep CPU idle state on every CPU",
        scope: Scope::CpuIdleState,
        source: Source::EveryCpu("cpuidle/state{state}/disable"),
        encoding: Encoding::Integer,
        desired: "1",
        default: "0",
        optional: true,
        durable: Durable::BootService(
            "for f in /sys/devices/system/cpu/cpu*/cpuidle/state{state}/disable; do echo {value} > $f; done",
        ),
    },
];

// ============================================================================
// Expansion
// ============================================================================

/// Everything needed to turn a table entry into live parameters
struct Expander<'a> {
    config: &'a HosttuneConfig,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Expander<'_> {
    fn names(&self, scope: Scope) -> Vec<String> {
        let host = &self.config.host;
        match scope {
            Scope::Host => vec![String::new()],
            Scope::BlockDevice => host.block_devices.clone(),
            Scope::Interface => host.network_interfaces.clone(),
            Scope::Pool => host.zfs_pools.clone(),
            Scope::Gpu => host.gpus.clone(),
            Scope::CpuIdleState => host.cpu_idle_states.iter().map(u32::to_string).collect(),
        }
    }

    fn target(&self, source: Source, fill: &dyn Fn(&str) -> String, name: &str) -> Box<dyn Target> {
        let host = &self.config.host;
        match source {
            Source::Proc(rel) => Box::new(VirtualFile::new(
                host.procfs_root().join(fill(rel)),
                self.timeout,
            )),
            Source::Sys(rel) => Box::new(VirtualFile::new(
                host.sysfs_root().join(fill(rel)),
                self.timeout,
            )),
            Source::EveryCpu(rel) => Box::new(FileSet::new(
                host.sysfs_root().join("devices/system/cpu"),
                "cpu",
                fill(rel),
                self.timeout,
            )),
            Source::PoolProperty(property) => {
                Box::new(PoolProperty::new(self.runner.clone(), name, property))
            }
            Source::Ring(direction) => {
                Box::new(RingBuffer::new(self.runner.clone(), name, direction))
            }
            Source::Gpu(field) => Box::new(GpuSetting::new(self.runner.clone(), name, field)),
        }
    }

    fn expand(&self, entry: &Entry) -> Result<Vec<Parameter>, RegistryError> {
        let mut expanded = Vec::new();
        for name in self.names(entry.scope) {
            let fill = |template: &str| match entry.scope.placeholder() {
                Some(placeholder) => template.replace(placeholder, &name),
                None => template.to_string(),
            };
            let id = fill(entry.id);
            let parse = |text: &str| {
                Value::parse(entry.encoding, text).map_err(|_| {
                    InvalidParameter {
                        id: id.clone(),
                        reason: format!("table value {text:?} does not parse"),
                    }
                })
            };

            let parameter = Parameter::new(
                id.clone(),
                entry.category,
                self.target(entry.source, &fill, &name),
                entry.encoding,
                parse(entry.desired)?,
                parse(entry.default)?,
            )
            .with_description(entry.description)
            .optional(entry.optional)
            .persisted_by(mechanism(entry.durable, &fill));

            expanded.push(parameter);
        }
        Ok(expanded)
    }
}

fn mechanism(durable: Durable, fill: &dyn Fn(&str) -> String) -> Mechanism {
    match durable {
        Durable::Nothing(reason) => Mechanism::None {
            reason: reason.to_string(),
        },
        Durable::Native => Mechanism::Native,
        Durable::Sysctl(key) => Mechanism::Sysctl {
            key: key.to_string(),
        },
        Durable::ModuleOption { module, option } => Mechanism::ModuleOption {
            module: module.to_string(),
            option: option.to_string(),
        },
        Durable::DeviceRule {
            subsystem,
            kernel,
            attribute,
        } => Mechanism::DeviceRule {
            subsystem: subsystem.to_string(),
            kernel: fill(kernel),
            attribute: attribute.to_string(),
        },
        Durable::BootService(command) => Mechanism::BootService {
            command: fill(command),
        },
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The immutable, ordered set of parameters for this host
#[derive(Debug)]
pub struct Registry {
    parameters: Vec<Parameter>,
}

impl Registry {
    /// Expand the built-in table against the host configuration
    pub fn load(
        config: &HosttuneConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, RegistryError> {
        let expander = Expander {
            config,
            runner,
            timeout: config.target_timeout(),
        };
        let mut parameters = Vec::new();
        for entry in TABLE {
            parameters.extend(expander.expand(entry)?);
        }
        let registry = Self::from_parameters(parameters, config)?;
        log::debug!("Registry loaded with {} parameters", registry.len());
        Ok(registry)
    }

    /// Apply overrides and disables from `config`, then validate
    pub fn from_parameters(
        mut parameters: Vec<Parameter>,
        config: &HosttuneConfig,
    ) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for p in &parameters {
            if !seen.insert(p.id.clone()) {
                return Err(RegistryError::Duplicate(p.id.clone()));
            }
        }

        for id in &config.disabled {
            if !seen.contains(id) {
                return Err(RegistryError::UnknownId {
                    field: "disabled",
                    id: id.clone(),
                });
            }
        }

        for (id, text) in &config.overrides {
            let Some(p) = parameters.iter_mut().find(|p| &p.id == id) else {
                return Err(RegistryError::UnknownId {
                    field: "overrides",
                    id: id.clone(),
                });
            };
            p.desired_value =
                Value::parse(p.encoding, text).map_err(|source| RegistryError::BadOverride {
                    id: id.clone(),
                    source,
                })?;
            log::debug!("{} overridden to {}", id, p.desired_value);
        }

        parameters.retain(|p| !config.disabled.contains(&p.id));

        for p in &parameters {
            p.validate()?;
        }

        Ok(Self { parameters })
    }

    /// Parameters in declaration order; an empty filter selects every category
    pub fn list_parameters(&self, categories: &[Category]) -> Vec<&Parameter> {
        self.parameters
            .iter()
            .filter(|p| categories.is_empty() || categories.contains(&p.category))
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<&Parameter, RegistryError> {
        self.parameters
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }
}
