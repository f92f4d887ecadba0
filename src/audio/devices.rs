//! # Media Device Enumeration
//!
//! Sorts a platform's raw device enumeration into audio inputs, audio outputs
//! and video inputs.
//!
//! ## Filtering rules:
//! - Entries with a blank label or blank id are skipped (platforms hide both
//!   until the user grants media permission)
//! - Each list is sorted by label
//! - Kinds other than the three above go to an optional hook instead of
//!   being silently discarded

use crate::error::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Kind of media device, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
    /// Anything the relay does not route
    Other,
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audioinput" => Ok(DeviceKind::AudioInput),
            "audiooutput" => Ok(DeviceKind::AudioOutput),
            "videoinput" => Ok(DeviceKind::VideoInput),
            _ => Err(format!("Unknown device kind: {}", s)),
        }
    }
}

impl DeviceKind {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceKind::AudioInput => "audioinput",
            DeviceKind::AudioOutput => "audiooutput",
            DeviceKind::VideoInput => "videoinput",
            DeviceKind::Other => "other",
        }
    }
}

/// One entry of a platform enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDevice {
    pub device_id: String,
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub group_id: String,
}

impl MediaDevice {
    pub fn new(kind: &str, device_id: &str, label: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind: kind.to_string(),
            label: label.to_string(),
            group_id: String::new(),
        }
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.kind.parse().unwrap_or(DeviceKind::Other)
    }

    /// Both label and id carry something other than whitespace.
    pub fn is_usable(&self) -> bool {
        !self.label.trim().is_empty() && !self.device_id.trim().is_empty()
    }
}

/// Callback for devices whose kind is not routed anywhere.
pub type UnrecognizedDeviceHook = Arc<dyn Fn(&MediaDevice) + Send + Sync>;

/// Result of one enumeration, rebuilt from scratch each time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLists {
    pub audio_inputs: Vec<MediaDevice>,
    pub audio_outputs: Vec<MediaDevice>,
    pub video_inputs: Vec<MediaDevice>,
}

impl DeviceLists {
    pub fn is_empty(&self) -> bool {
        self.audio_inputs.is_empty() && self.audio_outputs.is_empty() && self.video_inputs.is_empty()
    }

    /// Whether an audio input with this id was enumerated.
    pub fn has_audio_input(&self, device_id: &str) -> bool {
        self.audio_inputs.iter().any(|d| d.device_id == device_id)
    }
}

/// Split `devices` into per-kind lists.
///
/// `on_unrecognized` sees every entry of an unknown kind, usable or not.
pub fn classify_devices(
    devices: impl IntoIterator<Item = MediaDevice>,
    on_unrecognized: Option<&UnrecognizedDeviceHook>,
) -> DeviceLists {
    let mut lists = DeviceLists::default();

    for device in devices {
        let target = match device.device_kind() {
            DeviceKind::AudioInput => &mut lists.audio_inputs,
            DeviceKind::AudioOutput => &mut lists.audio_outputs,
            DeviceKind::VideoInput => &mut lists.video_inputs,
            DeviceKind::Other => {
                debug!(kind = %device.kind, "Unrecognized device kind");
                if let Some(hook) = on_unrecognized {
                    hook(&device);
                }
                continue;
            }
        };
        if device.is_usable() {
            target.push(device);
        }
    }

    lists.audio_inputs.sort_by(|a, b| a.label.cmp(&b.label));
    lists.audio_outputs.sort_by(|a, b| a.label.cmp(&b.label));
    lists.video_inputs.sort_by(|a, b| a.label.cmp(&b.label));
    lists
}

/// Parse a JSON array of `{deviceId, kind, label, groupId}` objects.
pub fn parse_device_list(json: &str) -> AudioResult<Vec<MediaDevice>> {
    serde_json::from_str(json)
        .map_err(|e| AudioError::DeviceUnavailable(format!("invalid device list: {}", e)))
}
