//! Parameter: the unit of tuning

use crate::target::BoxedTarget;
use crate::types::{Category, Encoding, Value, Volatility};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A parameter whose declarations contradict each other
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid parameter {id}: {reason}")]
pub struct InvalidParameter {
    pub id: String,
    pub reason: String,
}

/// Durable-config family able to re-apply a parameter at boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "family")]
pub enum Mechanism {
    /// Nothing durable re-applies this value
    None { reason: String },
    /// The target keeps its own value (e.g. a pool property)
    Native,
    /// Kernel parameter set at boot from a sysctl drop-in
    Sysctl { key: String },
    /// Kernel module option set at module load
    ModuleOption { module: String, option: String },
    /// Device attribute set by a udev rule
    DeviceRule {
        subsystem: String,
        kernel: String,
        attribute: String,
    },
    /// Command re-run by a oneshot boot service; `{value}` is substituted
    BootService { command: String },
}

impl Mechanism {
    /// Short family name for listings
    pub fn family(&self) -> &'static str {
        match self {
            Self::None { .. } => "none",
            Self::Native => "native",
            Self::Sysctl { .. } => "sysctl",
            Self::ModuleOption { .. } => "modprobe",
            Self::DeviceRule { .. } => "udev",
            Self::BootService { .. } => "service",
        }
    }
}

/// A declared tunable
pub struct Parameter {
    pub id: String,
    pub category: Category,
    pub description: String,
    pub target: BoxedTarget,
    pub encoding: Encoding,
    pub desired_value: Value,
    pub default_value: Value,
    pub requires_privilege: bool,
    pub volatility: Volatility,
    /// A missing target is expected on some hosts
    pub optional: bool,
    pub mechanism: Mechanism,
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("target", &self.target.location())
            .field("desired_value", &self.desired_value)
            .field("default_value", &self.default_value)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

impl Parameter {
    /// Create a required, privileged, ephemeral parameter with no durable mechanism
    pub fn new(
        id: impl Into<String>,
        category: Category,
        target: BoxedTarget,
        encoding: Encoding,
        desired_value: Value,
        default_value: Value,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            description: String::new(),
            target,
            encoding,
            desired_value,
            default_value,
            requires_privilege: true,
            volatility: Volatility::Ephemeral,
            optional: false,
            mechanism: Mechanism::None {
                reason: "no durable mechanism declared".to_string(),
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Set the durable mechanism; volatility follows from it
    pub fn persisted_by(mut self, mechanism: Mechanism) -> Self {
        self.volatility = match mechanism {
            Mechanism::None { .. } => Volatility::Ephemeral,
            _ => Volatility::PersistentViaOs,
        };
        self.mechanism = mechanism;
        self
    }

    /// Check that values and durability declarations agree with each other
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        let invalid = |reason: String| InvalidParameter {
            id: self.id.clone(),
            reason,
        };
        for (name, value) in [
            ("desired", &self.desired_value),
            ("default", &self.default_value),
        ] {
            if !value.matches_encoding(self.encoding) {
                return Err(invalid(format!(
                    "{name} value {value} does not match encoding {:?}",
                    self.encoding
                )));
            }
        }
        match (&self.volatility, &self.mechanism) {
            (Volatility::Ephemeral, Mechanism::None { .. }) => Ok(()),
            (Volatility::Ephemeral, m) => Err(invalid(format!(
                "ephemeral parameter declares a {} mechanism",
                m.family()
            ))),
            (Volatility::PersistentViaOs, Mechanism::None { .. }) => Err(invalid(
                "persistent-via-os parameter has no durable mechanism".to_string(),
            )),
            (Volatility::PersistentViaOs, _) => Ok(()),
        }
    }
}
