//! Remote bucket lifecycle on top of a narrow object-storage capability.
//!
//! [`BucketStore`] is the raw API surface (list/insert/delete buckets,
//! list/delete objects). [`BucketLifecycle`] adds the policy the driver and
//! reconciler rely on: existence checks scoped to one project, tolerant
//! creation, and two-phase teardown (empty, then delete), which the backing
//! API requires.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, info};

mod gcs;
mod token;

pub use gcs::{DEFAULT_STORAGE_ENDPOINT, GcsSettings, GcsStore};
pub use token::{STORAGE_SCOPE, TokenSource};

/// Future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors raised by remote bucket and object operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Raised when the request never produced an HTTP response.
    #[error("storage transport error: {message}")]
    Transport {
        /// Client error string.
        message: String,
    },
    /// Raised when the API answers with an unexpected status.
    #[error("storage API rejected {operation} with status {status}: {message}")]
    Api {
        /// Operation being attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body returned by the API.
        message: String,
    },
    /// Raised when creating a bucket whose name is taken.
    #[error("bucket {bucket} already exists")]
    BucketAlreadyExists {
        /// Bucket name.
        bucket: String,
    },
    /// Raised when deleting a bucket that still holds objects.
    #[error("bucket {bucket} is not empty")]
    BucketNotEmpty {
        /// Bucket name.
        bucket: String,
    },
    /// Raised when the bucket does not exist.
    #[error("bucket {bucket} not found")]
    BucketNotFound {
        /// Bucket name.
        bucket: String,
    },
    /// Raised when a response body cannot be parsed.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation whose response failed to parse.
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when no access token could be obtained.
    #[error("failed to obtain storage access token: {message}")]
    Token {
        /// Description of the failure.
        message: String,
    },
}

/// One page of object names from a bucket listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectPage {
    /// Object names on this page.
    pub names: Vec<String>,
    /// Cursor for the next page; `None` once the listing is complete.
    pub next_page_token: Option<String>,
}

/// Raw object-storage operations used by the lifecycle manager.
pub trait BucketStore: Send + Sync {
    /// Lists every bucket name owned by `project_id`.
    fn list_buckets<'a>(&'a self, project_id: &'a str) -> StorageFuture<'a, Vec<String>>;

    /// Creates `bucket` under `project_id`.
    fn insert_bucket<'a>(&'a self, project_id: &'a str, bucket: &'a str)
    -> StorageFuture<'a, ()>;

    /// Deletes an empty bucket.
    fn delete_bucket<'a>(&'a self, bucket: &'a str) -> StorageFuture<'a, ()>;

    /// Lists one page of objects, starting at `page_token` when given.
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        page_token: Option<&'a str>,
    ) -> StorageFuture<'a, ObjectPage>;

    /// Deletes a single object.
    fn delete_object<'a>(&'a self, bucket: &'a str, object: &'a str) -> StorageFuture<'a, ()>;
}

/// Whether [`BucketLifecycle::ensure`] had to create the bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ensured {
    /// The bucket was already present.
    Existing,
    /// The bucket was created by this call.
    Created,
}

/// Bucket lifecycle scoped to one project.
#[derive(Clone, Debug)]
pub struct BucketLifecycle<S> {
    store: S,
    project_id: String,
}

impl<S: BucketStore> BucketLifecycle<S> {
    /// Wraps `store` for buckets owned by `project_id`.
    #[must_use]
    pub fn new(store: S, project_id: impl Into<String>) -> Self {
        Self {
            store,
            project_id: project_id.into(),
        }
    }

    /// Project every bucket belongs to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Lists all bucket names in the project.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport or authorisation failures.
    pub async fn list(&self) -> Result<BTreeSet<String>, StorageError> {
        let names = self.store.list_buckets(&self.project_id).await?;
        Ok(names.into_iter().collect())
    }

    /// Returns whether `bucket` exists in the project.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport or authorisation failures.
    pub async fn exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let found = self.list().await?.contains(bucket);
        debug!(bucket, found, "checked bucket existence");
        Ok(found)
    }

    /// Creates `bucket`. An existing bucket surfaces as
    /// [`StorageError::BucketAlreadyExists`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the API rejects the creation.
    pub async fn create(&self, bucket: &str) -> Result<(), StorageError> {
        self.store.insert_bucket(&self.project_id, bucket).await?;
        info!(bucket, project = %self.project_id, "bucket created");
        Ok(())
    }

    /// Creates `bucket` unless it already exists. A concurrent creator
    /// winning the race between the check and the insert is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when listing or creation fails.
    pub async fn ensure(&self, bucket: &str) -> Result<Ensured, StorageError> {
        if self.exists(bucket).await? {
            return Ok(Ensured::Existing);
        }
        match self.create(bucket).await {
            Ok(()) => Ok(Ensured::Created),
            Err(StorageError::BucketAlreadyExists { .. }) => Ok(Ensured::Existing),
            Err(err) => Err(err),
        }
    }

    /// Deletes every object in `bucket`, page by page, and returns how many
    /// were removed. The first failed delete aborts the sweep; re-running it
    /// later is safe.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when listing or any single delete fails.
    pub async fn empty(&self, bucket: &str) -> Result<usize, StorageError> {
        let mut deleted = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = self.store.list_objects(bucket, cursor.as_deref()).await?;
            for object in &page.names {
                debug!(bucket, object = %object, "deleting object");
                self.store.delete_object(bucket, object).await?;
                deleted += 1;
            }
            match page.next_page_token {
                Some(token) => cursor = Some(token),
                None => break,
            }
        }
        Ok(deleted)
    }

    /// Deletes an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotEmpty`] when objects remain, or any
    /// other [`StorageError`] the API reports.
    pub async fn delete(&self, bucket: &str) -> Result<(), StorageError> {
        self.store.delete_bucket(bucket).await?;
        info!(bucket, "bucket deleted");
        Ok(())
    }

    /// Empties `bucket` and then deletes it, returning the number of objects
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] hit; the bucket may be left
    /// partially emptied.
    pub async fn empty_and_delete(&self, bucket: &str) -> Result<usize, StorageError> {
        let deleted = self.empty(bucket).await?;
        self.delete(bucket).await?;
        Ok(deleted)
    }
}
