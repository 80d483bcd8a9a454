//! Device records and handles.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::channel::{AdbError, DeviceChannel};

/// Placeholder for properties that could not be read.
pub const UNKNOWN: &str = "unknown";

/// `key:value` descriptors trailing each line of `adb devices -l`.
static DESCRIPTOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+):(\S+)").expect("descriptor pattern is valid"));

/// How a device is attached to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Usb,
    Tcp,
    Emulator,
}

impl ConnectionType {
    fn from_serial(serial: &str) -> Self {
        if serial.starts_with("emulator-") {
            Self::Emulator
        } else if serial.contains(':') {
            Self::Tcp
        } else {
            Self::Usb
        }
    }
}

/// Eligibility state derived from the bridge status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Unknown,
    Unauthorized,
    AuthorizedOffline,
    AuthorizedOnline,
}

impl DeviceState {
    /// Map the status column of the discovery listing.
    pub fn from_status(status: &str) -> Self {
        match status {
            "device" => Self::AuthorizedOnline,
            "offline" => Self::AuthorizedOffline,
            "unauthorized" => Self::Unauthorized,
            _ => Self::Unknown,
        }
    }

    pub fn is_online(self) -> bool {
        self == Self::AuthorizedOnline
    }

    pub fn is_authorized(self) -> bool {
        matches!(self, Self::AuthorizedOnline | Self::AuthorizedOffline)
    }
}

/// Metadata about one device seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
    pub os_version: String,
    pub manufacturer: String,
    pub sdk_version: String,
    pub online: bool,
    pub authorized: bool,
    pub state: DeviceState,
    pub connection: ConnectionType,
}

impl DeviceInfo {
    /// A record with every property unknown.
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        let serial = serial.into();
        Self {
            connection: ConnectionType::from_serial(&serial),
            serial,
            model: UNKNOWN.to_string(),
            os_version: UNKNOWN.to_string(),
            manufacturer: UNKNOWN.to_string(),
            sdk_version: UNKNOWN.to_string(),
            online: state.is_online(),
            authorized: state.is_authorized(),
            state,
        }
    }

    /// A device that dropped out of discovery.
    pub fn gone(serial: impl Into<String>) -> Self {
        Self::new(serial, DeviceState::Unknown)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Only authorized, online devices may be selected.
    pub fn is_eligible(&self) -> bool {
        self.state() == DeviceState::AuthorizedOnline
    }

    /// Overlay read properties; unknown values keep what discovery knew.
    pub(crate) fn apply(&mut self, props: DeviceProperties) {
        let fields = [
            (&mut self.model, props.model),
            (&mut self.manufacturer, props.manufacturer),
            (&mut self.os_version, props.os_version),
            (&mut self.sdk_version, props.sdk_version),
        ];
        for (slot, value) in fields {
            if value != UNKNOWN {
                *slot = value;
            }
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, Android {}, {}, {})",
            self.serial,
            self.model,
            self.os_version,
            if self.online { "online" } else { "offline" },
            if self.authorized { "authorized" } else { "unauthorized" },
        )
    }
}

/// Parse the output of the discovery command.
///
/// The header line and daemon notices are skipped. See
/// [`DeviceState::from_status`] for the status mapping; `recovery`,
/// `no permissions` and similar map to [`DeviceState::Unknown`].
pub fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(serial), Some(status)) = (parts.next(), parts.next()) else {
            continue;
        };

        let mut info = DeviceInfo::new(serial, DeviceState::from_status(status));
        for caps in DESCRIPTOR_RE.captures_iter(line) {
            if &caps[1] == "model" {
                info.model = caps[2].replace('_', " ");
            }
        }
        devices.push(info);
    }

    devices
}

/// Properties read from a device with `getprop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub model: String,
    pub manufacturer: String,
    pub os_version: String,
    pub sdk_version: String,
}

/// A binding between one device serial and the channel that reaches it.
///
/// Handles are cheap to clone; tools receive one from
/// [`DeviceManager::get_device`](super::DeviceManager::get_device).
#[derive(Clone)]
pub struct DeviceHandle {
    serial: String,
    channel: Arc<dyn DeviceChannel>,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    pub fn new(serial: impl Into<String>, channel: Arc<dyn DeviceChannel>) -> Self {
        Self {
            serial: serial.into(),
            channel,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether the bridge still reports this device as attached and usable.
    pub async fn is_connected(&self) -> bool {
        match self.channel.query(&self.serial, &["get-state"]).await {
            Ok(state) => state.trim() == "device",
            Err(e) => {
                tracing::debug!("get-state failed for {}: {}", self.serial, e);
                false
            }
        }
    }

    /// Run a shell command on the device.
    pub async fn shell(&self, args: &[&str]) -> Result<String, AdbError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.channel.query(&self.serial, &full).await
    }

    /// Read one system property.
    pub async fn getprop(&self, prop: &str) -> Result<String, AdbError> {
        self.shell(&["getprop", prop])
            .await
            .map(|v| v.trim().to_string())
    }

    /// Read model, manufacturer and version properties. Each property that
    /// fails or comes back empty degrades to `"unknown"`.
    pub async fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            model: self.prop_or_unknown("ro.product.model").await,
            manufacturer: self.prop_or_unknown("ro.product.manufacturer").await,
            os_version: self.prop_or_unknown("ro.build.version.release").await,
            sdk_version: self.prop_or_unknown("ro.build.version.sdk").await,
        }
    }

    async fn prop_or_unknown(&self, prop: &str) -> String {
        match self.getprop(prop).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => UNKNOWN.to_string(),
            Err(e) => {
                tracing::debug!("Could not read {} from {}: {}", prop, self.serial, e);
                UNKNOWN.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
* daemon not running; starting now at tcp:5037
* daemon started successfully
List of devices attached
R58M123ABC             device usb:1-1 product:beyond1 model:SM_G973F device:beyond1 transport_id:1
192.168.1.20:5555      offline transport_id:2
emulator-5554          unauthorized transport_id:3
0123456789             recovery
";

    #[test]
    fn test_parse_device_list() {
        let devices = parse_device_list(LISTING);
        assert_eq!(devices.len(), 4);

        assert_eq!(devices[0].serial, "R58M123ABC");
        assert_eq!(devices[0].model, "SM G973F");
        assert_eq!(devices[0].connection, ConnectionType::Usb);
        assert_eq!(devices[0].state(), DeviceState::AuthorizedOnline);

        assert_eq!(devices[1].connection, ConnectionType::Tcp);
        assert_eq!(devices[1].state(), DeviceState::AuthorizedOffline);

        assert_eq!(devices[2].connection, ConnectionType::Emulator);
        assert_eq!(devices[2].state(), DeviceState::Unauthorized);
        assert_eq!(devices[2].model, UNKNOWN);

        assert_eq!(devices[3].state(), DeviceState::Unknown);
        assert!(!devices[3].online);
        assert!(!devices[3].is_eligible());
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_device_list("List of devices attached\n\n").is_empty());
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_display() {
        let info = DeviceInfo::new("abc", DeviceState::AuthorizedOnline);
        assert_eq!(
            info.to_string(),
            "abc (unknown, Android unknown, online, authorized)"
        );
    }
}
