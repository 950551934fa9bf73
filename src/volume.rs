//! Volume records and the values derived from a volume name.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Option key accepted by `Create` to choose the cleanup policy.
pub const CLEANUP_OPTION: &str = "clean_cloud_bucket";

/// Longest accepted volume name, in bytes.
pub const MAX_VOLUME_NAME_LEN: usize = 200;

const MAX_BUCKET_NAME_LEN: usize = 222;
const MAX_BUCKET_PART_LEN: usize = 63;

/// Errors raised while validating volume names and create options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// The name cannot be used as a path component or bucket suffix.
    #[error("invalid volume name '{name}': {reason}")]
    InvalidName {
        /// Name supplied by the runtime.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
    /// A create option was unknown or carried an unsupported value.
    #[error("invalid option {key}={value}: {reason}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// Option value.
        value: String,
        /// Why the option was rejected.
        reason: &'static str,
    },
}

/// A validated volume name, safe to use as a single path component and as
/// the suffix of a bucket name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VolumeName(String);

impl VolumeName {
    /// Validates `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] when the name is empty, `.` or
    /// `..`, uses anything but lowercase letters, digits, `-`, `_` and `.`,
    /// does not end with a letter or digit, contains `..`, or is longer than
    /// [`MAX_VOLUME_NAME_LEN`] bytes.
    pub fn parse(name: impl Into<String>) -> Result<Self, VolumeError> {
        let raw = name.into();
        let reason = if raw.is_empty() {
            Some("name must not be empty")
        } else if raw == "." || raw == ".." {
            Some("name must not be a relative path marker")
        } else if !raw.chars().all(is_bucket_char) {
            Some("name may only contain lowercase letters, digits, '-', '_' and '.'")
        } else if !raw.ends_with(|ch: char| ch.is_ascii_lowercase() || ch.is_ascii_digit()) {
            Some("name must end with a lowercase letter or digit")
        } else if raw.contains("..") {
            Some("name must not contain consecutive dots")
        } else if raw.len() > MAX_VOLUME_NAME_LEN {
            Some("name is too long")
        } else {
            None
        };

        match reason {
            Some(why) => Err(VolumeError::InvalidName {
                name: raw,
                reason: why,
            }),
            None => Ok(Self(raw)),
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

const fn is_bucket_char(ch: char) -> bool {
    matches!(ch, 'a'..='z' | '0'..='9' | '-' | '_' | '.')
}

/// Derives the backing bucket name for a volume: `<project>_<volume>`.
///
/// Two volume names can only collide if their concatenation with the project
/// id collides, which is not mitigated.
///
/// # Errors
///
/// Returns [`VolumeError::InvalidName`] when the combined name breaks the
/// Cloud Storage naming rules: at most 63 characters without dots, at most
/// 222 with dots and 63 per dot-separated part, and no `goog` prefix or
/// `google` substring.
pub fn bucket_name_for(project_id: &str, volume: &VolumeName) -> Result<String, VolumeError> {
    let bucket = format!("{project_id}_{volume}");
    let reason = if bucket.len() > MAX_BUCKET_NAME_LEN {
        Some("bucket name would exceed 222 characters")
    } else if bucket.split('.').any(|part| part.len() > MAX_BUCKET_PART_LEN) {
        Some("bucket name would have a part longer than 63 characters")
    } else if bucket.starts_with("goog") || bucket.contains("google") {
        Some("bucket name must not start with 'goog' or contain 'google'")
    } else {
        None
    };

    match reason {
        Some(why) => Err(VolumeError::InvalidName {
            name: volume.to_string(),
            reason: why,
        }),
        None => Ok(bucket),
    }
}

/// What happens to the backing bucket when the volume is removed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CleanupPolicy {
    /// Empty the bucket and delete it.
    #[default]
    DeleteBucket,
    /// Leave the bucket and its objects in place.
    KeepBucket,
}

impl CleanupPolicy {
    /// Returns `true` when removal should destroy the bucket.
    #[must_use]
    pub const fn deletes_bucket(self) -> bool {
        matches!(self, Self::DeleteBucket)
    }

    /// Parses the create options passed by the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidOption`] for unknown keys or values other
    /// than `yes`, `no`, `true` or `false`.
    pub fn from_options<S: std::hash::BuildHasher>(
        options: &HashMap<String, String, S>,
    ) -> Result<Self, VolumeError> {
        let mut policy = Self::default();
        for (key, value) in options {
            if key != CLEANUP_OPTION {
                return Err(VolumeError::InvalidOption {
                    key: key.clone(),
                    value: value.clone(),
                    reason: "unknown option",
                });
            }
            policy = match value.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" => Self::DeleteBucket,
                "no" | "false" => Self::KeepBucket,
                _ => {
                    return Err(VolumeError::InvalidOption {
                        key: key.clone(),
                        value: value.clone(),
                        reason: "expected yes or no",
                    });
                }
            };
        }
        Ok(policy)
    }
}

/// Lifecycle position of a registered volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Created or discovered, never mounted since.
    Registered,
    /// The mount helper is attached to the mountpoint.
    Mounted,
    /// Mounted at least once and detached again.
    Unmounted,
}

impl LifecycleState {
    /// Stable lowercase label used in logs and plugin status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for one named volume.
///
/// `mountpoint` and `bucket_name` are pure functions of the name and
/// process-wide constants; they are cached here for lookups only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRecord {
    /// Unique volume name.
    pub name: VolumeName,
    /// Host directory the bucket is mounted into.
    pub mountpoint: Utf8PathBuf,
    /// Remote bucket backing the volume.
    pub bucket_name: String,
    /// Removal behaviour chosen at creation time.
    pub cleanup: CleanupPolicy,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Callers currently holding the volume mounted.
    pub mount_ids: BTreeSet<String>,
}

impl VolumeRecord {
    /// Builds a freshly registered record.
    #[must_use]
    pub const fn registered(
        name: VolumeName,
        mountpoint: Utf8PathBuf,
        bucket_name: String,
        cleanup: CleanupPolicy,
    ) -> Self {
        Self {
            name,
            mountpoint,
            bucket_name,
            cleanup,
            state: LifecycleState::Registered,
            mount_ids: BTreeSet::new(),
        }
    }
}
