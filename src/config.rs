//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::DriverSettings;
use crate::storage::GcsSettings;

/// Default host root holding every volume directory.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/docker-volumes/gcstorage";
/// Default plugin socket the runtime discovers.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/gcstorage.sock";

/// Log line rendering chosen by configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-oriented single-line output.
    Compact,
    /// One JSON object per line.
    Json,
}

/// Plugin configuration merged from defaults, `gcsvol.toml`, `GCSVOL_*`
/// environment variables and command-line overrides.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GCSVOL",
    discovery(
        app_name = "gcsvol",
        env_var = "GCSVOL_CONFIG_PATH",
        config_file_name = "gcsvol.toml",
        dotfile_name = ".gcsvol.toml",
        project_file_name = "gcsvol.toml"
    )
)]
pub struct PluginConfig {
    /// Service-account JSON key. Read once at startup for the project id
    /// and handed to the mount helper. Required, but may arrive through the
    /// `--gcp-key-json` override after loading.
    pub key_file: Option<String>,
    /// Directory holding `<volume>/_data` mountpoints.
    #[ortho_config(default = DEFAULT_ROOT_DIR.to_owned())]
    pub root_dir: String,
    /// Unix socket the plugin listens on.
    #[ortho_config(default = DEFAULT_SOCKET_PATH.to_owned())]
    pub socket_path: String,
    /// FUSE helper that attaches a bucket to a directory.
    #[ortho_config(default = "gcsfuse".to_owned())]
    pub mount_bin: String,
    /// Helper that detaches a FUSE mount.
    #[ortho_config(default = "fusermount".to_owned())]
    pub unmount_bin: String,
    /// Location for new buckets.
    #[ortho_config(default = "US".to_owned())]
    pub bucket_location: String,
    /// Storage class for new buckets.
    #[ortho_config(default = "STANDARD".to_owned())]
    pub storage_class: String,
    /// Cloud Storage JSON API base URL.
    #[ortho_config(default = crate::storage::DEFAULT_STORAGE_ENDPOINT.to_owned())]
    pub storage_endpoint: String,
    /// Fixed bearer token. When unset, tokens are signed with the key file.
    pub access_token: Option<String>,
    /// Remove the new mountpoint when bucket setup fails during Create.
    #[ortho_config(default = true)]
    pub rollback_on_create_failure: bool,
    /// `compact` or `json`.
    #[ortho_config(default = "compact".to_owned())]
    pub log_format: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 6] = [
    FieldMetadata::new("service-account key file", "GCSVOL_KEY_FILE", "key_file"),
    FieldMetadata::new("volume root directory", "GCSVOL_ROOT_DIR", "root_dir"),
    FieldMetadata::new("plugin socket path", "GCSVOL_SOCKET_PATH", "socket_path"),
    FieldMetadata::new("mount helper", "GCSVOL_MOUNT_BIN", "mount_bin"),
    FieldMetadata::new("unmount helper", "GCSVOL_UNMOUNT_BIN", "unmount_bin"),
    FieldMetadata::new("storage endpoint", "GCSVOL_STORAGE_ENDPOINT", "storage_endpoint"),
];

impl PluginConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {}, pass it on the command line, or add {} to gcsvol.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments; command-line
    /// overrides are applied afterwards by the binary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("gcsvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank required values and
    /// [`ConfigError::Invalid`] for an unknown log format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            self.key_file.as_deref().unwrap_or_default(),
            self.root_dir.as_str(),
            self.socket_path.as_str(),
            self.mount_bin.as_str(),
            self.unmount_bin.as_str(),
            self.storage_endpoint.as_str(),
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        self.log_format()?;
        Ok(())
    }

    /// Parses `log_format`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for anything but `compact` or `json`.
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        match self.log_format.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!(
                "log_format must be compact or json, got {other:?} (GCSVOL_LOG_FORMAT)"
            ))),
        }
    }

    /// Host root as a path.
    #[must_use]
    pub fn root_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.root_dir)
    }

    /// Plugin socket as a path.
    #[must_use]
    pub fn socket_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.socket_path)
    }

    /// Key file as a path; empty when unset, which [`Self::validate`]
    /// rejects.
    #[must_use]
    pub fn key_file(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.key_file.as_deref().unwrap_or_default())
    }

    /// Storage client settings.
    #[must_use]
    pub fn gcs_settings(&self) -> GcsSettings {
        GcsSettings {
            endpoint: self.storage_endpoint.clone(),
            location: self.bucket_location.clone(),
            storage_class: self.storage_class.clone(),
        }
    }

    /// Driver behaviour switches.
    #[must_use]
    pub const fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            rollback_on_create_failure: self.rollback_on_create_failure,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value that is present but unusable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
