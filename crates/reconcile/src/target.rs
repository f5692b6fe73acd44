//! Target trait for live configuration points
//!
//! A Target is an addressable live location (a virtual file, a driver
//! control, a pool property) that can be read and written as text. Parsing
//! that text into a [`Value`](crate::Value) is the State Reader's job.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Raw text read from a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    /// The location does not exist on this host
    Absent,
    /// Current raw contents
    Raw(String),
    /// A multi-member target whose members disagree
    Mixed(Vec<String>),
}

/// Errors raised while accessing a target
#[derive(Debug, Error)]
pub enum TargetError {
    /// Refused by the OS, driver or firmware
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The target rejected the written value
    #[error("rejected: {0}")]
    Rejected(String),

    /// Access did not complete within the time limit
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The location does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Output could not be interpreted
    #[error("unexpected output: {0}")]
    Malformed(String),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TargetError {
    /// Map an I/O error on `location` to the matching variant
    pub fn from_io(err: io::Error, location: &str) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(location.to_string()),
            io::ErrorKind::NotFound => Self::NotFound(location.to_string()),
            // sysfs answers EINVAL/EBUSY for values the driver refuses
            io::ErrorKind::InvalidInput | io::ErrorKind::ResourceBusy => {
                Self::Rejected(format!("{location}: {err}"))
            }
            _ => Self::Io(err),
        }
    }

    /// Whether the error means the OS or firmware refused the access
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::Rejected(_) | Self::Timeout(_)
        )
    }
}

/// A live configuration point
pub trait Target: Send + Sync + fmt::Debug {
    /// Address shown to operators (a path or a command)
    fn location(&self) -> String;

    /// Read the current raw value
    fn read(&self) -> Result<Reading, TargetError>;

    /// Write a raw value
    fn write(&self, raw: &str) -> Result<(), TargetError>;
}

/// A boxed target for type-erased storage
pub type BoxedTarget = Box<dyn Target>;
