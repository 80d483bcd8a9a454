//! ADB (Android Debug Bridge) module: device discovery and session management.

mod channel;
mod device;
mod manager;
mod reconnect;
#[cfg(test)]
pub(crate) mod testing;

pub use channel::{AdbChannel, AdbError, DeviceChannel, DEFAULT_COMMAND_TIMEOUT_SECS};
pub use device::{
    parse_device_list, ConnectionType, DeviceHandle, DeviceInfo, DeviceProperties, DeviceState,
    UNKNOWN,
};
pub use manager::{DeviceCallback, DeviceError, DeviceEvent, DeviceManager};
pub use reconnect::{ReconnectConfig, DEFAULT_RECONNECT_INTERVAL_SECS, DEFAULT_STOP_TIMEOUT_SECS};
