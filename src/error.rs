//! Error types for HDHomeRun operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during HDHomeRun operations.
#[derive(Error, Debug)]
pub enum HdhrError {
    /// The request could not be sent or no reply arrived in time.
    #[error("communication error sending request to hdhomerun device: {0}")]
    Communication(#[source] io::Error),

    /// The device replied but declined the operation.
    #[error("{0}")]
    Rejected(String),

    /// The device returned something the client does not understand.
    #[error("undocumented error reported by library")]
    Undocumented,

    /// A local resource could not be accessed. The device was never contacted.
    #[error("local I/O error: {0}")]
    LocalIo(#[source] io::Error),

    /// An argument failed validation before any network activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The firmware upgrade sequence terminated without the device coming back.
    #[error("firmware upgrade failed: {0}")]
    Upgrade(#[from] UpgradeFailure),
}

/// Why an upgrade that was accepted by the device still failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeFailure {
    /// The device did not answer a version query within the attempt bound.
    #[error("error finding device after firmware upgrade ({attempts} attempts)")]
    DeviceNotFound { attempts: u32 },

    /// The caller cancelled the reboot wait.
    #[error("wait for device reboot cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Classification of an [`HdhrError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport could not complete the exchange.
    Communication,
    /// Device explicitly declined.
    Rejected,
    /// Response outside the known set.
    Undocumented,
    /// Local resource failure.
    LocalIo,
    /// Argument validation failure.
    InvalidArgument,
    /// Upgrade sequence ended in its failed state.
    UpgradeFailed,
}

/// Result type alias for HDHomeRun operations.
pub type Result<T> = std::result::Result<T, HdhrError>;

impl HdhrError {
    /// Create a rejection, falling back to `default` when the device gave no reason.
    pub fn rejected(reason: Option<String>, default: &str) -> Self {
        Self::Rejected(reason.unwrap_or_else(|| default.to_string()))
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wrap a transport error.
    pub fn communication(err: io::Error) -> Self {
        Self::Communication(err)
    }

    /// Get the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Communication(_) => ErrorKind::Communication,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Undocumented => ErrorKind::Undocumented,
            Self::LocalIo(_) => ErrorKind::LocalIo,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Upgrade(_) => ErrorKind::UpgradeFailed,
        }
    }

    /// The reason string carried by a rejection.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Communication(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        )
    }
}
