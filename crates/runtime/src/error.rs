//! Failure classification for retry decisions.
//!
//! The retry engine never catches "everything": each preset names the failure
//! classes it is willing to retry, and anything outside that set propagates
//! unchanged after a single attempt. [`FailureClass`] is the closed vocabulary
//! of transient-failure kinds the engine understands; error types opt in by
//! implementing [`Classify`].
//!
//! A malformed request, a constraint violation or any other permanent failure
//! must classify as [`FailureClass::Permanent`] so that retries never mask it.

use std::io;

/// Coarse failure kinds used to decide retryability.
///
/// The classes mirror the resource-specific failure sets of the preset
/// policies (see [`crate::resilience::RetryPolicies`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// An established connection dropped mid-operation.
    ConnectionLost,
    /// A transient, operational database failure (lock contention, pool
    /// exhaustion, serialization failure).
    TransientDatabase,
    /// The remote end refused a new connection.
    ConnectionRefused,
    /// The operation did not complete within its deadline.
    Timeout,
    /// A generic I/O failure.
    Io,
    /// A failure reported by the operating system (raw errno).
    Os,
    /// The caller lacks permission for the resource.
    PermissionDenied,
    /// A wire-protocol level failure (e.g. an SMTP reply code).
    Protocol,
    /// A permanent failure; never retried by any preset.
    Permanent,
}

/// Classification hook for error types participating in retry.
pub trait Classify: std::error::Error {
    /// Returns the failure class of this error.
    fn class(&self) -> FailureClass;
}

impl Classify for io::Error {
    fn class(&self) -> FailureClass {
        match self.kind() {
            io::ErrorKind::ConnectionRefused => FailureClass::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => FailureClass::ConnectionLost,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureClass::Timeout,
            io::ErrorKind::PermissionDenied => FailureClass::PermissionDenied,
            _ => {
                if self.raw_os_error().is_some() {
                    FailureClass::Os
                } else {
                    FailureClass::Io
                }
            }
        }
    }
}
