//! Concrete targets for this host
//!
//! - [`VirtualFile`]: a single /proc/sys or /sys file
//! - [`FileSet`]: the same attribute across many sysfs directories
//! - [`PoolProperty`], [`RingBuffer`], [`GpuSetting`]: management commands

mod command;
mod sysfs;

pub use command::{GpuField, GpuSetting, PoolProperty, RingBuffer, RingDirection};
pub use sysfs::{FileSet, VirtualFile};

use reconcile::TargetError;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Run blocking file I/O on a helper thread, giving up after `timeout`
///
/// A timed-out thread is abandoned; the kernel call it is blocked in cannot
/// be cancelled.
fn with_timeout<T, F>(timeout: Duration, location: &str, op: F) -> Result<T, TargetError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("hosttune-io".to_string())
        .spawn(move || {
            let _ = tx.send(op());
        })
        .map_err(TargetError::Io)?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(|e| TargetError::from_io(e, location)),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{location}: no answer within {timeout:?}");
            Err(TargetError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(TargetError::Io(io::Error::other(
            "I/O thread exited without a result",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_returns_value() {
        let v = with_timeout(Duration::from_secs(1), "x", || Ok(7)).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn test_with_timeout_expires() {
        let err = with_timeout(Duration::from_millis(50), "x", || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, TargetError::Timeout(_)));
    }

    #[test]
    fn test_with_timeout_classifies_io_errors() {
        let err = with_timeout::<(), _>(Duration::from_secs(1), "/x", || {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();
        assert!(matches!(err, TargetError::PermissionDenied(_)));
    }
}
