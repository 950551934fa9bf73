//! Startup reconciliation of the registry with disk and remote state.
//!
//! Runs once before any request is served. Every volume directory found
//! under the root is registered, and a bucket is created for any volume
//! whose bucket is missing (a crash between the two Create steps leaves
//! exactly that state behind).

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::mountpoint::{MountpointError, MountpointManager};
use crate::registry::VolumeRegistry;
use crate::storage::{BucketLifecycle, BucketStore, StorageError};
use crate::volume::{CleanupPolicy, VolumeRecord, bucket_name_for};

/// Errors that abort reconciliation and therefore startup.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// Raised when the host root cannot be created or scanned.
    #[error("failed to scan volume root: {0}")]
    Mountpoint(#[from] MountpointError),
    /// Raised when bucket listing or creation fails.
    #[error("failed to reconcile buckets: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of a reconciliation pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileReport {
    /// Volumes registered from disk.
    pub registered: usize,
    /// Buckets that had to be created.
    pub buckets_created: Vec<String>,
}

/// Rebuilds the registry from the host layout.
#[derive(Debug)]
pub struct Reconciler<'a, S> {
    mountpoints: &'a MountpointManager,
    buckets: &'a BucketLifecycle<S>,
    registry: &'a VolumeRegistry,
}

impl<'a, S: BucketStore> Reconciler<'a, S> {
    /// Borrows the collaborators for one pass.
    #[must_use]
    pub const fn new(
        mountpoints: &'a MountpointManager,
        buckets: &'a BucketLifecycle<S>,
        registry: &'a VolumeRegistry,
    ) -> Self {
        Self {
            mountpoints,
            buckets,
            registry,
        }
    }

    /// Scans the root, ensures buckets, and registers every volume found
    /// with the default cleanup policy. A missing root is created.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] on the first filesystem or storage failure;
    /// the caller must not serve requests afterwards.
    #[instrument(skip(self), fields(root = %self.mountpoints.root()))]
    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        self.mountpoints.ensure_root()?;
        let discovered = self.mountpoints.discover()?;
        let mut report = ReconcileReport::default();
        if discovered.is_empty() {
            info!("no existing volumes found");
            return Ok(report);
        }

        let existing = self.buckets.list().await?;
        for name in discovered {
            let bucket = match bucket_name_for(self.buckets.project_id(), &name) {
                Ok(bucket) => bucket,
                Err(err) => {
                    warn!(volume = %name, error = %err, "skipping volume without a valid bucket name");
                    continue;
                }
            };
            if !existing.contains(&bucket) {
                match self.buckets.create(&bucket).await {
                    Ok(()) => report.buckets_created.push(bucket.clone()),
                    Err(StorageError::BucketAlreadyExists { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            let mountpoint = self.mountpoints.mountpoint_for(&name);
            info!(volume = %name, bucket = %bucket, "volume restored");
            self.registry.put(VolumeRecord::registered(
                name,
                mountpoint,
                bucket,
                CleanupPolicy::DeleteBucket,
            ));
            report.registered += 1;
        }
        info!(
            registered = report.registered,
            buckets_created = report.buckets_created.len(),
            "reconciliation complete"
        );
        Ok(report)
    }
}
