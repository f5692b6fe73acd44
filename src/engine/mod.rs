//! Execution engine for hosttune
//!
//! The engine orchestrates:
//! 1. Loading - configuration, then the registry expanded for this host
//! 2. Selecting - category and id filters over the registry
//! 3. Executing - one reconciliation run with confirmation and progress
//! 4. Reporting - the outcome table and its call-outs

pub mod executor;
pub mod report;
pub mod selection;

pub use executor::{RunOptions, execute};
pub use selection::select;

use anyhow::{Context as AnyhowContext, Result};
use std::sync::Arc;

use crate::Context;
use crate::config::HosttuneConfig;
use crate::paths;
use crate::registry::Registry;
use crate::runner::SystemRunner;

/// Everything a command needs, loaded once per invocation
pub struct Session {
    pub config: HosttuneConfig,
    pub registry: Registry,
    pub runner: Arc<SystemRunner>,
}

impl Session {
    pub fn load(ctx: &Context) -> Result<Self> {
        let path = paths::config_file(ctx.config.as_deref());
        let config = HosttuneConfig::load(&path)?;
        let runner = Arc::new(SystemRunner::new(config.target_timeout()));
        let registry = Registry::load(&config, runner.clone())
            .with_context(|| format!("Failed to build parameter registry from {}", path.display()))?;
        Ok(Self {
            config,
            registry,
            runner,
        })
    }
}
