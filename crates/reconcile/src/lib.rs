//! # Reconcile
//!
//! An idempotent engine for driving live host settings toward declared values.
//!
//! This crate provides the core abstractions for declaring tunable
//! parameters, reading their live state, converging them to a goal, and
//! recording every attempt in an append-only journal.
//!
//! ## Core Concepts
//!
//! - **Target**: A live location (virtual file, driver control, pool property)
//! - **Parameter**: A target plus its encoding, desired and default values
//! - **Reader**: Reads and classifies a parameter's current value
//! - **Reconciler**: Reads, compares, writes, and verifies by re-reading
//! - **Journal**: Append-only log of change records, source of rollback points
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     Category, Encoding, MemoryJournal, Mode, Parameter, Value, reconcile_simple,
//! };
//!
//! let swappiness = Parameter::new(
//!     "mem.swappiness",
//!     Category::Memory,
//!     Box::new(SysctlFile::new("/proc/sys/vm/swappiness")),
//!     Encoding::Integer,
//!     Value::Int(10),
//!     Value::Int(60),
//! );
//!
//! let mut journal = MemoryJournal::new();
//! let report = reconcile_simple(&[&swappiness], Mode::apply(), &mut journal);
//! assert!(report.summary().is_clean());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Target`]: Reads and writes one live location
//! - [`Journal`]: Stores change records durably
//! - [`CommandRunner`]: Runs management commands with a time limit
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks, storage formats, process runners, etc.

pub mod context;
pub mod journal;
pub mod parameter;
pub mod reader;
pub mod reconciler;
pub mod target;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, CommandRunner, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use journal::{ChangeRecord, Journal, MemoryJournal, PendingChange};
pub use parameter::{InvalidParameter, Mechanism, Parameter};
pub use reader::{Observed, ReadError, read};
pub use reconciler::{RunReport, reconcile, reconcile_simple};
pub use target::{BoxedTarget, Reading, Target, TargetError};
pub use types::{
    Category, CommandOutput, Encoding, Goal, Mode, Outcome, RunSummary, Value, ValueError,
    Volatility, is_word,
};
