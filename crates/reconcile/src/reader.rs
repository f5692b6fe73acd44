//! State Reader - reads and classifies a parameter's live value

use crate::parameter::Parameter;
use crate::target::{Reading, TargetError};
use crate::types::Value;
use thiserror::Error;

/// A successful read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Value(Value),
    /// Target missing on a parameter that declares itself optional
    Absent,
}

/// Why a read failed
#[derive(Debug, Error)]
pub enum ReadError {
    /// Missing, timed out, failed, or unparseable
    #[error("unreadable: {0}")]
    Unreadable(String),

    /// Refused by the OS, driver or firmware
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Read the current value of a parameter from its live source
///
/// A missing target is only acceptable when the parameter is optional;
/// otherwise it is surfaced as [`ReadError::Unreadable`].
pub fn read(parameter: &Parameter) -> Result<Observed, ReadError> {
    let location = parameter.target.location();
    let reading = match parameter.target.read() {
        Ok(reading) => reading,
        Err(TargetError::NotFound(_)) => Reading::Absent,
        Err(TargetError::PermissionDenied(msg)) => return Err(ReadError::PermissionDenied(msg)),
        Err(e) => return Err(ReadError::Unreadable(format!("{location}: {e}"))),
    };

    match reading {
        Reading::Absent if parameter.optional => {
            log::debug!("{}: optional target {} absent", parameter.id, location);
            Ok(Observed::Absent)
        }
        Reading::Absent => Err(ReadError::Unreadable(format!("{location} does not exist"))),
        Reading::Mixed(values) => Ok(Observed::Value(Value::Mixed(values))),
        Reading::Raw(raw) => Value::parse(parameter.encoding, &raw)
            .map(Observed::Value)
            .map_err(|e| ReadError::Unreadable(format!("{location}: {e}"))),
    }
}
