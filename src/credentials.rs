//! Service-account key loading.
//!
//! Only the fields the plugin needs are read. The raw document is kept for
//! minting storage tokens and the mount helper receives the key by path.

use std::fmt;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while reading the key file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// Raised when the file cannot be opened or read.
    #[error("failed to read credentials {path}: {message}")]
    Read {
        /// Key file path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the file is not a service-account key.
    #[error("failed to parse credentials {path}: {message}")]
    Parse {
        /// Key file path.
        path: String,
        /// Parser error string.
        message: String,
    },
    /// Raised when the key carries no project id.
    #[error("credentials {path} do not name a project_id")]
    MissingProject {
        /// Key file path.
        path: String,
    },
}

/// Raw key JSON. Debug output never shows the content.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct KeyDocument(String);

impl KeyDocument {
    /// Returns the JSON document as read from disk.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyDocument(<redacted>)")
    }
}

/// Fields of a service-account key used by the plugin.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServiceAccountKey {
    /// Project owning every bucket.
    #[serde(default)]
    pub project_id: String,
    /// Account identity, logged at startup.
    #[serde(default)]
    pub client_email: Option<String>,
    /// Whole key file, used to sign token requests.
    #[serde(skip)]
    pub document: KeyDocument,
}

impl ServiceAccountKey {
    /// Reads and validates the key at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError`] when the file is unreadable, malformed,
    /// or has a blank `project_id`.
    pub fn load(path: &Utf8Path) -> Result<Self, CredentialsError> {
        let read_error = |message: String| CredentialsError::Read {
            path: path.to_string(),
            message,
        };
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| read_error(String::from("path has no file name")))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| read_error(err.to_string()))?;
        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| read_error(err.to_string()))?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Utf8Path, contents: &str) -> Result<Self, CredentialsError> {
        let mut key: Self = serde_json::from_str(contents).map_err(|err| CredentialsError::Parse {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        if key.project_id.trim().is_empty() {
            return Err(CredentialsError::MissingProject {
                path: path.to_string(),
            });
        }
        key.document = KeyDocument(contents.to_owned());
        Ok(key)
    }
}
