//! Request and response bodies of the volume plugin protocol.
//!
//! Field names follow the runtime's capitalised JSON keys. Every request
//! field defaults so that an empty or partial body still decodes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::volume::VolumeRecord;

/// `Plugin.Activate` answer.
#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    /// Subsystems implemented by the plugin.
    #[serde(rename = "Implements")]
    pub implements: Vec<&'static str>,
}

/// Body carrying only a volume name.
#[derive(Debug, Default, Deserialize)]
pub struct NameRequest {
    /// Volume name.
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// `VolumeDriver.Create` request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateRequest {
    /// Volume name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Driver options given with `docker volume create -o`.
    #[serde(rename = "Opts", default)]
    pub opts: Option<HashMap<String, String>>,
}

/// `VolumeDriver.Mount` and `VolumeDriver.Unmount` request.
#[derive(Debug, Default, Deserialize)]
pub struct MountRequest {
    /// Volume name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Caller identifier, unique per container.
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// Answer carrying only the error field, empty on success.
#[derive(Debug, Serialize)]
pub struct ErrResponse {
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// `VolumeDriver.Path` and `VolumeDriver.Mount` answer.
#[derive(Debug, Serialize)]
pub struct MountpointResponse {
    /// Host path of the volume.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// One volume as reported by Get and List.
#[derive(Debug, Serialize)]
pub struct VolumeInfo {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Host path of the volume.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    /// Driver-specific details, reported by Get only.
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<BTreeMap<&'static str, String>>,
}

impl VolumeInfo {
    /// Name and mountpoint only.
    #[must_use]
    pub fn summary(record: &VolumeRecord) -> Self {
        Self {
            name: record.name.to_string(),
            mountpoint: record.mountpoint.to_string(),
            status: None,
        }
    }

    /// Name, mountpoint and driver status.
    #[must_use]
    pub fn detailed(record: &VolumeRecord) -> Self {
        let cleanup = if record.cleanup.deletes_bucket() {
            "delete"
        } else {
            "keep"
        };
        let status = BTreeMap::from([
            ("state", record.state.to_string()),
            ("bucket", record.bucket_name.clone()),
            ("cleanup", cleanup.to_owned()),
            ("mounts", record.mount_ids.len().to_string()),
        ]);
        Self {
            status: Some(status),
            ..Self::summary(record)
        }
    }
}

/// `VolumeDriver.Get` answer.
#[derive(Debug, Serialize)]
pub struct GetResponse {
    /// Requested volume, absent on error.
    #[serde(rename = "Volume", skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// `VolumeDriver.List` answer.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Every registered volume.
    #[serde(rename = "Volumes")]
    pub volumes: Vec<VolumeInfo>,
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// `VolumeDriver.Capabilities` answer.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Capability set.
    #[serde(rename = "Capabilities")]
    pub capabilities: Capabilities,
}

/// Capability set advertised to the runtime.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// `global` or `local`.
    #[serde(rename = "Scope")]
    pub scope: &'static str,
}
