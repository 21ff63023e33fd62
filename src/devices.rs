//! Device registry: the devices the projector resolves device-block patterns
//! against.

use crate::error::RegistryError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One keyboard known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

impl DeviceInfo {
    pub fn connected(id: impl Into<String>, serial: impl Into<String>) -> Self {
        DeviceInfo {
            id: id.into(),
            serial: Some(serial.into()),
            name: None,
            connected: true,
        }
    }
}

/// Source of the current device list.
pub trait DeviceRegistry {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RegistryError>;
}

/// Fixed list, mainly for tests and the check binary.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceRegistry {
    devices: Vec<DeviceInfo>,
}

impl StaticDeviceRegistry {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        StaticDeviceRegistry { devices }
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RegistryError> {
        Ok(self.devices.clone())
    }
}

/// `devices.json`: a JSON array of [`DeviceInfo`]. A missing file is an empty
/// registry.
#[derive(Debug, Clone)]
pub struct JsonDeviceRegistry {
    path: PathBuf,
}

impl JsonDeviceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonDeviceRegistry { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceRegistry for JsonDeviceRegistry {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RegistryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no device registry file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}

/// Whether a device-block pattern selects `device`: exact serial or id, or a
/// `*` glob over serial, id or name.
pub fn pattern_matches(pattern: &str, device: &DeviceInfo) -> bool {
    let candidates = || {
        std::iter::once(device.id.as_str())
            .chain(device.serial.as_deref())
            .chain(device.name.as_deref())
    };
    if !pattern.contains('*') {
        return device.serial.as_deref() == Some(pattern) || device.id == pattern;
    }
    match glob_regex(pattern) {
        Some(re) => candidates().any(|c| re.is_match(c)),
        None => false,
    }
}

fn glob_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str, serial: Option<&str>, name: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            serial: serial.map(str::to_string),
            name: name.map(str::to_string),
            connected: true,
        }
    }

    #[test]
    fn exact_match_on_serial_or_id() {
        let d = dev("usb-0001", Some("SN-001"), Some("Keychron K2"));
        assert!(pattern_matches("SN-001", &d));
        assert!(pattern_matches("usb-0001", &d));
        assert!(!pattern_matches("Keychron K2", &d));
        assert!(!pattern_matches("SN-00", &d));
    }

    #[test]
    fn glob_matches_any_identity_field() {
        let d = dev("usb-0001", Some("SN-001"), Some("Keychron K2"));
        assert!(pattern_matches("SN-*", &d));
        assert!(pattern_matches("*Keychron*", &d));
        assert!(pattern_matches("*", &d));
        assert!(!pattern_matches("SN-1*", &d));
        assert!(pattern_matches("usb-(*", &dev("usb-(1)", None, None)));
    }

    #[test]
    fn json_registry_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let reg = JsonDeviceRegistry::new(&path);
        assert!(reg.list_devices().unwrap().is_empty());

        std::fs::write(&path, r#"[{"id":"k1","serial":"SN-001","connected":true}]"#).unwrap();
        let devices = reg.list_devices().unwrap();
        assert_eq!(devices, vec![DeviceInfo::connected("k1", "SN-001")]);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(reg.list_devices(), Err(RegistryError::Corrupt { .. })));
    }
}
