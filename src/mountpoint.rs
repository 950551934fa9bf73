//! Host directories backing each volume.
//!
//! The on-disk layout is `<root>/<volume>/<DATA_MARKER>`. This module is the
//! only place that knows it: every other component obtains paths from
//! [`MountpointManager::mountpoint_for`], and the reconciler recognises
//! existing volumes through [`MountpointManager::discover`].

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::volume::VolumeName;

/// Fixed name of the subdirectory the bucket is mounted into.
pub const DATA_MARKER: &str = "_data";

/// Errors raised by host filesystem operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountpointError {
    /// Raised when a filesystem call fails for a reason other than absence.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when creating a mountpoint that is already on disk.
    #[error("host mountpoint {path} already exists")]
    AlreadyExists {
        /// Existing mountpoint.
        path: Utf8PathBuf,
    },
    /// Raised when a path does not follow `<root>/<volume>/<marker>`.
    #[error("{path} is not a volume mountpoint: {message}")]
    InvalidLayout {
        /// Offending path.
        path: Utf8PathBuf,
        /// What is wrong with it.
        message: String,
    },
}

impl MountpointError {
    fn io(path: &Utf8Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Creates, checks and deletes volume directories under a fixed root.
#[derive(Clone, Debug)]
pub struct MountpointManager {
    root: Utf8PathBuf,
}

impl MountpointManager {
    /// Manages volumes under `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding every volume directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Derives the mountpoint for `name`.
    #[must_use]
    pub fn mountpoint_for(&self, name: &VolumeName) -> Utf8PathBuf {
        self.root.join(name.as_str()).join(DATA_MARKER)
    }

    /// Returns whether `path` exists. Absence is `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MountpointError::Io`] for any failure other than not-found.
    pub fn exists(&self, path: &Utf8Path) -> Result<bool, MountpointError> {
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let Some(file_name) = path.file_name() else {
            return Err(MountpointError::InvalidLayout {
                path: path.to_path_buf(),
                message: String::from("path has no final component"),
            });
        };

        match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir
                .try_exists(file_name)
                .map_err(|err| MountpointError::io(path, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MountpointError::io(parent, &err)),
        }
    }

    /// Creates `path` and any missing ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`MountpointError::AlreadyExists`] when the path is already on
    /// disk, or [`MountpointError::Io`] on permission or disk failures.
    pub fn create(&self, path: &Utf8Path) -> Result<(), MountpointError> {
        if self.exists(path)? {
            return Err(MountpointError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| MountpointError::io(path, &err))?;
        info!(mountpoint = %path, "mountpoint created on host");
        Ok(())
    }

    /// Recursively deletes the volume directory one level above the
    /// mountpoint marker. Either the whole tree goes or an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MountpointError::InvalidLayout`] when `path` is not a
    /// mountpoint under this root, or [`MountpointError::Io`] when removal
    /// fails (including partial removal).
    pub fn delete(&self, path: &Utf8Path) -> Result<(), MountpointError> {
        let volume_dir = self.volume_dir_of(path)?;
        let Some(volume_dir_name) = volume_dir.file_name() else {
            return Err(MountpointError::InvalidLayout {
                path: path.to_path_buf(),
                message: String::from("volume directory has no name"),
            });
        };

        let root = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| MountpointError::io(&self.root, &err))?;
        root.remove_dir_all(volume_dir_name)
            .map_err(|err| MountpointError::io(volume_dir, &err))?;
        info!(volume_dir = %volume_dir, "volume directory deleted on host");
        Ok(())
    }

    /// Creates the root directory when it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`MountpointError::Io`] when the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), MountpointError> {
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| MountpointError::io(&self.root, &err))
    }

    /// Scans the root for directories whose only child is [`DATA_MARKER`]
    /// and returns their names in sorted order.
    ///
    /// Entries that are not directories, hold anything else, or carry a name
    /// that is not a valid volume name are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MountpointError::Io`] when the root or a candidate directory
    /// cannot be read.
    pub fn discover(&self) -> Result<Vec<VolumeName>, MountpointError> {
        let root = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| MountpointError::io(&self.root, &err))?;
        let entries = root
            .entries()
            .map_err(|err| MountpointError::io(&self.root, &err))?;

        let mut found = Vec::new();
        for item in entries {
            let entry = item.map_err(|err| MountpointError::io(&self.root, &err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| MountpointError::io(&self.root, &err))?;
            if !file_type.is_dir() {
                continue;
            }
            let dir_name = entry
                .file_name()
                .map_err(|err| MountpointError::io(&self.root, &err))?;
            let candidate = self.root.join(&dir_name);
            if !Self::holds_only_marker(&root, &dir_name, &candidate)? {
                debug!(path = %candidate, "skipping directory without volume layout");
                continue;
            }
            match VolumeName::parse(dir_name) {
                Ok(name) => found.push(name),
                Err(err) => warn!(path = %candidate, error = %err, "skipping unusable volume directory"),
            }
        }

        found.sort();
        Ok(found)
    }

    fn holds_only_marker(
        root: &Dir,
        dir_name: &str,
        candidate: &Utf8Path,
    ) -> Result<bool, MountpointError> {
        let children = root
            .read_dir(dir_name)
            .map_err(|err| MountpointError::io(candidate, &err))?;
        let mut names = Vec::new();
        for item in children {
            let child = item.map_err(|err| MountpointError::io(candidate, &err))?;
            names.push(
                child
                    .file_name()
                    .map_err(|err| MountpointError::io(candidate, &err))?,
            );
        }
        Ok(matches!(names.as_slice(), [only] if only == DATA_MARKER))
    }

    fn volume_dir_of<'a>(&self, path: &'a Utf8Path) -> Result<&'a Utf8Path, MountpointError> {
        if path.file_name() != Some(DATA_MARKER) {
            return Err(MountpointError::InvalidLayout {
                path: path.to_path_buf(),
                message: format!("final component must be {DATA_MARKER}"),
            });
        }
        let volume_dir = path.parent().ok_or_else(|| MountpointError::InvalidLayout {
            path: path.to_path_buf(),
            message: String::from("missing volume directory"),
        })?;
        if volume_dir.parent() != Some(self.root.as_path()) {
            return Err(MountpointError::InvalidLayout {
                path: path.to_path_buf(),
                message: format!("volume directory must sit directly under {}", self.root),
            });
        }
        Ok(volume_dir)
    }
}
