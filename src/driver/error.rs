//! Errors surfaced by driver operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::mount::MountError;
use crate::mountpoint::MountpointError;
use crate::storage::StorageError;
use crate::volume::{LifecycleState, VolumeError};

/// Coarse classification of a [`DriverError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Unknown volume, or its mountpoint vanished.
    NotFound,
    /// Duplicate volume or mountpoint.
    AlreadyExists,
    /// Malformed name or create option.
    InvalidRequest,
    /// Operation not valid in the volume's current state.
    InvalidState,
    /// Host filesystem failure.
    Io,
    /// Remote storage failure.
    StorageApi,
    /// Mount helper failure.
    Process,
}

/// Error returned by every driver operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when the volume is not registered.
    #[error("volume {name} not found")]
    NotFound {
        /// Requested volume.
        name: String,
    },
    /// Raised when creating a volume that is already registered.
    #[error("volume {name} already exists")]
    AlreadyExists {
        /// Requested volume.
        name: String,
    },
    /// Raised when a volume name cannot be used.
    #[error("invalid volume name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// Raised for unknown create options or unusable option values.
    #[error("invalid option {key}={value}: {reason}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// Option value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// Raised when the operation is not valid in the current state.
    #[error("volume {name} is {state}: {message}")]
    InvalidState {
        /// Volume involved.
        name: String,
        /// State at the time of the request.
        state: LifecycleState,
        /// What was refused.
        message: String,
    },
    /// Raised when a registered volume's mountpoint is gone from disk.
    #[error("mountpoint {path} for volume {name} does not exist")]
    MountpointMissing {
        /// Volume involved.
        name: String,
        /// Expected mountpoint.
        path: Utf8PathBuf,
    },
    /// Host filesystem failure.
    #[error(transparent)]
    Mountpoint(#[from] MountpointError),
    /// Remote storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Mount helper failure.
    #[error(transparent)]
    Mount(#[from] MountError),
    /// Raised when Create failed and removing its mountpoint failed too.
    #[error("{source}; removing the new mountpoint also failed: {rollback}")]
    Rollback {
        /// Failure that triggered the rollback.
        source: StorageError,
        /// Failure of the rollback itself.
        rollback: MountpointError,
    },
}

impl DriverError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::MountpointMissing { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } | Self::Mountpoint(MountpointError::AlreadyExists { .. }) => {
                ErrorKind::AlreadyExists
            }
            Self::InvalidName { .. } | Self::InvalidOption { .. } => ErrorKind::InvalidRequest,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Mountpoint(_) => ErrorKind::Io,
            Self::Storage(_) | Self::Rollback { .. } => ErrorKind::StorageApi,
            Self::Mount(_) => ErrorKind::Process,
        }
    }
}

impl From<VolumeError> for DriverError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::InvalidName { name, reason } => Self::InvalidName { name, reason },
            VolumeError::InvalidOption { key, value, reason } => {
                Self::InvalidOption { key, value, reason }
            }
        }
    }
}
