//! Audio device enumeration for the control surface.

use serde::{Deserialize, Serialize};

/// Which side of the duplex a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub kind: DeviceKind,
    /// Whether this is the system default device for its kind.
    pub is_default: bool,
}

/// List all available input and output devices on the system.
///
/// Returns an empty `Vec` if cpal is unavailable or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = Vec::new();

    if let Ok(devices) = host.input_devices() {
        for (idx, device) in devices.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let is_default = default_input.as_deref() == Some(name.as_str());
            list.push(DeviceInfo {
                name,
                kind: DeviceKind::Input,
                is_default,
            });
        }
    } else {
        tracing::warn!("failed to enumerate input devices");
    }

    if let Ok(devices) = host.output_devices() {
        for (idx, device) in devices.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
            let is_default = default_output.as_deref() == Some(name.as_str());
            list.push(DeviceInfo {
                name,
                kind: DeviceKind::Output,
                is_default,
            });
        }
    } else {
        tracing::warn!("failed to enumerate output devices");
    }

    list.sort_by_key(|d| (d.kind == DeviceKind::Output, !d.is_default));
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_serializes_with_lowercase_kind() {
        let info = DeviceInfo {
            name: "Built-in Microphone".into(),
            kind: DeviceKind::Input,
            is_default: true,
        };
        let json = serde_json::to_value(&info).expect("serialize device info");
        assert_eq!(json["kind"], "input");
        assert_eq!(json["isDefault"], true);
    }
}
