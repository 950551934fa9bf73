//! Core library for the `gcsvol` Docker volume plugin.
//!
//! Each named volume is a host directory (`<root>/<name>/_data`) with a
//! Cloud Storage bucket (`<project>_<name>`) mounted into it by a FUSE
//! helper. The [`Driver`] keeps the in-memory registry, the host layout and
//! the remote buckets consistent across restarts, partial failures and
//! concurrent requests; [`protocol`] exposes it over the plugin socket.

pub mod command;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod locks;
pub mod mount;
pub mod mountpoint;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod storage;
pub mod test_support;
pub mod volume;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, LogFormat, PluginConfig};
pub use credentials::{CredentialsError, KeyDocument, ServiceAccountKey};
pub use driver::{Driver, DriverError, DriverParts, DriverSettings, ErrorKind};
pub use locks::{NameGuard, NameLocks};
pub use mount::{MountError, MountExecutor};
pub use mountpoint::{DATA_MARKER, MountpointError, MountpointManager};
pub use protocol::ProtocolError;
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler};
pub use registry::VolumeRegistry;
pub use storage::{
    BucketLifecycle, BucketStore, Ensured, GcsSettings, GcsStore, ObjectPage, StorageError,
    TokenSource,
};
pub use volume::{
    CleanupPolicy, LifecycleState, VolumeError, VolumeName, VolumeRecord, bucket_name_for,
};
