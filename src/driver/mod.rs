//! Volume lifecycle orchestration.
//!
//! Each operation sequences the registry, host mountpoints, remote buckets
//! and the mount helper. Lifecycle operations on one name are serialised
//! through [`NameLocks`]; read-only operations go straight to the registry.
//!
//! State machine per name:
//!
//! ```text
//! Absent --Create--> Registered --Mount--> Mounted --Unmount--> Unmounted
//!                        |                    ^                     |
//!                        |                    +-------Mount---------+
//!                        +--------Remove (Registered | Unmounted)--> Absent
//! ```

use std::collections::HashMap;
use std::hash::BuildHasher;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, instrument, warn};

use crate::command::CommandRunner;
use crate::locks::NameLocks;
use crate::mount::MountExecutor;
use crate::mountpoint::MountpointManager;
use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler};
use crate::registry::VolumeRegistry;
use crate::storage::{BucketLifecycle, BucketStore, StorageError};
use crate::volume::{CleanupPolicy, LifecycleState, VolumeName, VolumeRecord, bucket_name_for};

mod error;

pub use error::{DriverError, ErrorKind};

/// Visibility scope advertised to the runtime.
pub const CAPABILITY_SCOPE: &str = "global";

/// Behaviour switches for the driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Delete the fresh mountpoint when bucket setup fails during Create.
    pub rollback_on_create_failure: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            rollback_on_create_failure: true,
        }
    }
}

/// Collaborators the driver orchestrates.
#[derive(Debug)]
pub struct DriverParts<S, R> {
    /// Host directory manager.
    pub mountpoints: MountpointManager,
    /// Remote bucket manager.
    pub buckets: BucketLifecycle<S>,
    /// Mount helper executor.
    pub mounter: MountExecutor<R>,
    /// Behaviour switches.
    pub settings: DriverSettings,
}

/// Volume lifecycle orchestrator; only obtainable through
/// [`Driver::start`], so it never serves an unreconciled registry.
#[derive(Debug)]
pub struct Driver<S, R> {
    registry: VolumeRegistry,
    locks: NameLocks,
    mountpoints: MountpointManager,
    buckets: BucketLifecycle<S>,
    mounter: MountExecutor<R>,
    settings: DriverSettings,
}

impl<S: BucketStore, R: CommandRunner + 'static> Driver<S, R> {
    /// Reconciles the registry with disk and remote state and returns a
    /// driver ready to serve requests.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when reconciliation fails; no driver is
    /// produced in that case.
    pub async fn start(parts: DriverParts<S, R>) -> Result<(Self, ReconcileReport), ReconcileError> {
        let DriverParts {
            mountpoints,
            buckets,
            mounter,
            settings,
        } = parts;
        let registry = VolumeRegistry::new();
        let report = Reconciler::new(&mountpoints, &buckets, &registry)
            .run()
            .await?;
        let driver = Self {
            registry,
            locks: NameLocks::new(),
            mountpoints,
            buckets,
            mounter,
            settings,
        };
        Ok((driver, report))
    }

    /// Registry backing List, Get and Path.
    #[must_use]
    pub const fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Host directory manager.
    #[must_use]
    pub const fn mountpoints(&self) -> &MountpointManager {
        &self.mountpoints
    }

    /// Remote bucket manager.
    #[must_use]
    pub const fn buckets(&self) -> &BucketLifecycle<S> {
        &self.buckets
    }

    /// Creates a volume: mountpoint, then bucket, then registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidName`] or [`DriverError::InvalidOption`]
    /// before any side effect, [`DriverError::AlreadyExists`] for a
    /// registered name, and collaborator failures otherwise.
    #[instrument(skip_all, fields(volume = name))]
    pub async fn create<H: BuildHasher>(
        &self,
        name: &str,
        options: &HashMap<String, String, H>,
    ) -> Result<VolumeRecord, DriverError> {
        let volume = VolumeName::parse(name)?;
        let bucket = bucket_name_for(self.buckets.project_id(), &volume)?;
        let cleanup = CleanupPolicy::from_options(options)?;
        let _guard = self.locks.acquire(volume.as_str()).await;

        if self.registry.contains(&volume) {
            return Err(DriverError::AlreadyExists {
                name: volume.to_string(),
            });
        }

        let mountpoint = self.mountpoints.mountpoint_for(&volume);
        self.mountpoints.create(&mountpoint)?;

        if let Err(err) = self.buckets.ensure(&bucket).await {
            return Err(self.roll_back_create(&mountpoint, err));
        }

        let record = VolumeRecord::registered(volume, mountpoint, bucket, cleanup);
        self.registry.put(record.clone());
        info!(bucket = %record.bucket_name, cleanup = ?record.cleanup, "volume created");
        Ok(record)
    }

    fn roll_back_create(&self, mountpoint: &Utf8Path, err: StorageError) -> DriverError {
        if !self.settings.rollback_on_create_failure {
            warn!(mountpoint = %mountpoint, error = %err, "bucket setup failed; mountpoint left in place");
            return err.into();
        }
        match self.mountpoints.delete(mountpoint) {
            Ok(()) => {
                warn!(mountpoint = %mountpoint, error = %err, "bucket setup failed; mountpoint removed");
                err.into()
            }
            Err(rollback) => DriverError::Rollback {
                source: err,
                rollback,
            },
        }
    }

    /// Removes a volume: mountpoint (if present), bucket (per cleanup
    /// policy), then registry entry. A failure leaves the record in place so
    /// the call can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown names,
    /// [`DriverError::InvalidState`] while mounted, and collaborator failures
    /// otherwise.
    #[instrument(skip_all, fields(volume = name))]
    pub async fn remove(&self, name: &str) -> Result<(), DriverError> {
        let volume = lookup_name(name)?;
        let _guard = self.locks.acquire(volume.as_str()).await;
        let record = self.require(&volume)?;

        if record.state == LifecycleState::Mounted {
            return Err(DriverError::InvalidState {
                name: volume.to_string(),
                state: record.state,
                message: format!("in use by {} container(s)", record.mount_ids.len()),
            });
        }

        if self.mountpoints.exists(&record.mountpoint)? {
            self.mountpoints.delete(&record.mountpoint)?;
        }

        if record.cleanup.deletes_bucket() {
            match self.buckets.empty_and_delete(&record.bucket_name).await {
                Ok(deleted) => info!(bucket = %record.bucket_name, deleted, "bucket destroyed"),
                Err(StorageError::BucketNotFound { .. }) => {
                    info!(bucket = %record.bucket_name, "bucket already gone");
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            info!(bucket = %record.bucket_name, "bucket kept");
        }

        self.registry.delete(&volume);
        info!("volume removed");
        Ok(())
    }

    /// Mounts the bucket for caller `id` and returns the mountpoint. The
    /// helper runs only for the first active caller.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown names,
    /// [`DriverError::MountpointMissing`] when the directory is gone, and
    /// [`DriverError::Mount`] when the helper fails.
    #[instrument(skip_all, fields(volume = name, caller = id))]
    pub async fn mount(&self, name: &str, id: &str) -> Result<Utf8PathBuf, DriverError> {
        let volume = lookup_name(name)?;
        let _guard = self.locks.acquire(volume.as_str()).await;
        let mut record = self.require(&volume)?;
        self.require_mountpoint(&record)?;

        if record.mount_ids.contains(id) {
            return Ok(record.mountpoint);
        }
        if record.mount_ids.is_empty() {
            self.mounter
                .mount(&record.mountpoint, &record.bucket_name)
                .await?;
        }
        record.mount_ids.insert(id.to_owned());
        record.state = LifecycleState::Mounted;
        let mountpoint = record.mountpoint.clone();
        info!(callers = record.mount_ids.len(), "volume mounted");
        self.registry.put(record);
        Ok(mountpoint)
    }

    /// Releases caller `id`. The helper runs only when the last caller
    /// leaves.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown names,
    /// [`DriverError::MountpointMissing`] when the directory is gone,
    /// [`DriverError::InvalidState`] when `id` holds no mount, and
    /// [`DriverError::Mount`] when the helper fails.
    #[instrument(skip_all, fields(volume = name, caller = id))]
    pub async fn unmount(&self, name: &str, id: &str) -> Result<(), DriverError> {
        let volume = lookup_name(name)?;
        let _guard = self.locks.acquire(volume.as_str()).await;
        let mut record = self.require(&volume)?;
        self.require_mountpoint(&record)?;

        if !record.mount_ids.contains(id) {
            return Err(DriverError::InvalidState {
                name: volume.to_string(),
                state: record.state,
                message: format!("not mounted for caller {id}"),
            });
        }
        if record.mount_ids.len() == 1 {
            self.mounter.unmount(&record.mountpoint).await?;
            record.state = LifecycleState::Unmounted;
        }
        record.mount_ids.remove(id);
        info!(callers = record.mount_ids.len(), "volume released");
        self.registry.put(record);
        Ok(())
    }

    /// Returns the mountpoint of a registered volume.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown names.
    pub fn path(&self, name: &str) -> Result<Utf8PathBuf, DriverError> {
        self.get(name).map(|record| record.mountpoint)
    }

    /// Returns a snapshot of one volume.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<VolumeRecord, DriverError> {
        let volume = lookup_name(name)?;
        self.require(&volume)
    }

    /// Returns every registered volume ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.registry.list()
    }

    /// Visibility scope of every volume.
    #[must_use]
    pub const fn capabilities() -> &'static str {
        CAPABILITY_SCOPE
    }

    fn require(&self, volume: &VolumeName) -> Result<VolumeRecord, DriverError> {
        self.registry
            .get(volume)
            .ok_or_else(|| DriverError::NotFound {
                name: volume.to_string(),
            })
    }

    fn require_mountpoint(&self, record: &VolumeRecord) -> Result<(), DriverError> {
        if self.mountpoints.exists(&record.mountpoint)? {
            return Ok(());
        }
        Err(DriverError::MountpointMissing {
            name: record.name.to_string(),
            path: record.mountpoint.clone(),
        })
    }
}

fn lookup_name(name: &str) -> Result<VolumeName, DriverError> {
    VolumeName::parse(name).map_err(|_| DriverError::NotFound {
        name: name.to_owned(),
    })
}
