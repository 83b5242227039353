//! Error types produced by the metadata lock manager (§7).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for manager operations.
pub type MdlResult<T> = Result<T, MdlError>;

/// The five error kinds the manager can surface to a caller (§7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MdlError {
    /// Allocation failure in the lock table, pins, or a ticket.
    /// Partial acquisitions are rolled back via savepoint by the caller.
    OutOfMemory,

    /// The wait deadline was exceeded before a grant arrived.
    Timeout,

    /// This context was chosen as the deadlock victim.
    Deadlock,

    /// The owning connection was killed while waiting.
    Killed,

    /// The owning connection disconnected while waiting.
    Disconnected,

    /// A caller precondition for `upgrade`/`downgrade` was violated; this is
    /// a programming error in the host, not a runtime condition.
    UpgradeNotAllowed(String),
}

impl MdlError {
    /// Whether retrying the same request later has a chance of succeeding.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            MdlError::OutOfMemory | MdlError::Timeout => true,
            MdlError::Deadlock | MdlError::Killed | MdlError::Disconnected => false,
            MdlError::UpgradeNotAllowed(_) => false,
        }
    }

    /// Coarse category string for metrics and logging, mirroring the
    /// `category()` accessor the host's error types expose elsewhere.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            MdlError::OutOfMemory => "resource",
            MdlError::Timeout => "timeout",
            MdlError::Deadlock => "deadlock",
            MdlError::Killed | MdlError::Disconnected => "cancellation",
            MdlError::UpgradeNotAllowed(_) => "precondition",
        }
    }

    /// Emits this error at the `tracing` level appropriate to its severity.
    pub fn log(&self) {
        match self {
            MdlError::Timeout | MdlError::Killed | MdlError::Disconnected => {
                tracing::warn!(error = %self, "mdl wait resolved without a grant");
            }
            MdlError::Deadlock => {
                tracing::error!(error = %self, "mdl deadlock victim selected");
            }
            MdlError::OutOfMemory | MdlError::UpgradeNotAllowed(_) => {
                tracing::error!(error = %self, "mdl operation failed");
            }
        }
    }
}

impl fmt::Display for MdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MdlError::OutOfMemory => write!(f, "out of memory"),
            MdlError::Timeout => write!(f, "lock wait timed out"),
            MdlError::Deadlock => write!(f, "deadlock detected, this context was the victim"),
            MdlError::Killed => write!(f, "connection was killed while waiting"),
            MdlError::Disconnected => write!(f, "connection was lost while waiting"),
            MdlError::UpgradeNotAllowed(msg) => write!(f, "upgrade not allowed: {msg}"),
        }
    }
}

impl std::error::Error for MdlError {}
