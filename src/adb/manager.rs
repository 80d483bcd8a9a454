//! Device session management: discovery, selection and connectivity events.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

use super::channel::{AdbChannel, AdbError, DeviceChannel};
use super::device::{parse_device_list, DeviceHandle, DeviceInfo};
use super::reconnect::{self, ReconnectConfig, ReconnectHandle};
use crate::panic_message;

/// Capacity of the device event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Device session errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(
        "No authorized Android device connected. Connect a device with USB debugging \
         enabled or run: adb connect <ip>"
    )]
    NoDevice,
    #[error("Device '{serial}' not found. Available: {available:?}")]
    NotFound {
        serial: String,
        available: Vec<String>,
    },
    #[error("Device discovery failed: {0}")]
    Discovery(#[from] AdbError),
}

/// Connectivity transition observed by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceInfo),
    Disconnected(DeviceInfo),
}

/// Observer invoked from the reconnect loop.
pub type DeviceCallback = Arc<dyn Fn(&DeviceInfo) + Send + Sync>;

#[derive(Default)]
struct DeviceSession {
    active_serial: Option<String>,
    cached: Option<DeviceHandle>,
}

struct ManagerInner {
    channel: Arc<dyn DeviceChannel>,
    session: Mutex<DeviceSession>,
    connect_callbacks: RwLock<Vec<DeviceCallback>>,
    disconnect_callbacks: RwLock<Vec<DeviceCallback>>,
    events: broadcast::Sender<DeviceEvent>,
    reconnect: Mutex<Option<ReconnectHandle>>,
}

/// Keeps exactly one active device and reports connectivity changes.
///
/// The manager is cheap to clone; clones share the session, the observers
/// and the reconnect loop.
///
/// # Example
/// ```rust,no_run
/// use aria_runtime::adb::{DeviceManager, ReconnectConfig};
///
/// # async fn demo() -> Result<(), aria_runtime::adb::DeviceError> {
/// let manager = DeviceManager::with_adb_path("adb");
/// manager.on_connect(|dev| println!("Connected: {}", dev.model));
/// manager.start_auto_reconnect(ReconnectConfig::default());
/// let device = manager.get_device().await?;
/// println!("Using {}", device.serial());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning reference held by the reconnect loop so that dropping the
/// last manager also ends the loop.
#[derive(Clone)]
pub(crate) struct WeakDeviceManager {
    inner: Weak<ManagerInner>,
}

impl WeakDeviceManager {
    pub(crate) fn upgrade(&self) -> Option<DeviceManager> {
        self.inner.upgrade().map(|inner| DeviceManager { inner })
    }
}

impl DeviceManager {
    /// Create a manager over any device channel.
    pub fn new(channel: Arc<dyn DeviceChannel>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                channel,
                session: Mutex::new(DeviceSession::default()),
                connect_callbacks: RwLock::new(Vec::new()),
                disconnect_callbacks: RwLock::new(Vec::new()),
                events,
                reconnect: Mutex::new(None),
            }),
        }
    }

    /// Create a manager driving the adb binary at `adb_path`.
    pub fn with_adb_path(adb_path: impl Into<String>) -> Self {
        Self::new(Arc::new(AdbChannel::with_path(adb_path)))
    }

    pub(crate) fn downgrade(&self) -> WeakDeviceManager {
        WeakDeviceManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn session(&self) -> MutexGuard<'_, DeviceSession> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serial of the active device, if one has been selected.
    pub fn active_serial(&self) -> Option<String> {
        self.session().active_serial.clone()
    }

    /// List every device the bridge reports.
    ///
    /// Devices that are not authorized and online are included but flagged.
    /// Online devices are enriched with their properties; a property that
    /// cannot be read is reported as `"unknown"`.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let output = self.inner.channel.discover().await?;
        let mut devices = parse_device_list(&output);

        for info in devices.iter_mut().filter(|d| d.online) {
            let handle = DeviceHandle::new(&info.serial, self.inner.channel.clone());
            info.apply(handle.properties().await);
        }

        Ok(devices)
    }

    /// Return a handle to the active device, selecting one if needed.
    ///
    /// A cached handle is reused while its device still answers. Otherwise
    /// the previously active serial is preferred when it is eligible, then
    /// the first eligible device in discovery order.
    pub async fn get_device(&self) -> Result<DeviceHandle, DeviceError> {
        let (preferred, cached) = {
            let session = self.session();
            (session.active_serial.clone(), session.cached.clone())
        };

        if let Some(handle) = cached {
            if handle.is_connected().await {
                return Ok(handle);
            }
            tracing::info!("Cached device {} no longer answers", handle.serial());
        }

        let devices = self.list_devices().await?;
        let eligible: Vec<&DeviceInfo> = devices.iter().filter(|d| d.is_eligible()).collect();

        let device = preferred
            .as_deref()
            .and_then(|serial| eligible.iter().copied().find(|d| d.serial == serial))
            .or_else(|| eligible.first().copied())
            .ok_or(DeviceError::NoDevice)?;

        let handle = DeviceHandle::new(&device.serial, self.inner.channel.clone());
        {
            let mut session = self.session();
            session.active_serial = Some(device.serial.clone());
            session.cached = Some(handle.clone());
        }
        tracing::info!("Active device: {}", device);
        Ok(handle)
    }

    /// Make `serial` the active device.
    ///
    /// The serial must appear in the current discovery listing. When it is
    /// not eligible yet, it is remembered as the preferred device but no
    /// handle is cached.
    pub async fn select_device(&self, serial: &str) -> Result<DeviceInfo, DeviceError> {
        let devices = self.list_devices().await?;
        let Some(device) = devices.iter().find(|d| d.serial == serial).cloned() else {
            return Err(DeviceError::NotFound {
                serial: serial.to_string(),
                available: devices.into_iter().map(|d| d.serial).collect(),
            });
        };

        let mut session = self.session();
        session.active_serial = Some(device.serial.clone());
        if device.is_eligible() {
            session.cached = Some(DeviceHandle::new(serial, self.inner.channel.clone()));
            tracing::info!("Selected device: {}", device);
        } else {
            session.cached = None;
            tracing::warn!("Selected device is not usable yet: {}", device);
        }
        Ok(device)
    }

    /// Poll discovery once a second until an eligible device shows up.
    pub async fn wait_for_device(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.list_devices().await {
                Ok(devices) if devices.iter().any(DeviceInfo::is_eligible) => return true,
                Ok(_) => {}
                Err(e) => tracing::debug!("Discovery failed while waiting: {}", e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// Register a callback fired when a device comes online.
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn(&DeviceInfo) + Send + Sync + 'static,
    {
        self.inner
            .connect_callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    /// Register a callback fired when a device goes away.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&DeviceInfo) + Send + Sync + 'static,
    {
        self.inner
            .disconnect_callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    /// Receive connectivity events as a stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Start the background reconnect loop. Returns `false` if it is
    /// already running.
    pub fn start_auto_reconnect(&self, config: ReconnectConfig) -> bool {
        let mut slot = self
            .inner
            .reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(ReconnectHandle::is_running) {
            tracing::debug!("Auto-reconnect already running");
            return false;
        }

        tracing::info!("ADB auto-reconnect started (interval={:?})", config.interval);
        *slot = Some(reconnect::spawn(self.downgrade(), config));
        true
    }

    /// Stop the reconnect loop, waiting at most for the configured stop
    /// timeout. Returns `false` if the loop had to be aborted.
    pub async fn stop_auto_reconnect(&self) -> bool {
        let handle = self
            .inner
            .reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match handle {
            Some(handle) => {
                let joined = handle.stop().await;
                tracing::info!("ADB auto-reconnect stopped");
                joined
            }
            None => true,
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(ReconnectHandle::is_running)
    }

    /// One reconnect iteration: rediscover, diff against `last_known` and
    /// fire events. `last_known` is left untouched when discovery fails so
    /// a transient error never reads as a disconnect.
    pub(crate) async fn poll_once(&self, last_known: &mut HashSet<String>) -> Result<(), DeviceError> {
        let devices = self.list_devices().await?;
        let (connected, disconnected) = reconnect::diff_online(last_known, &devices);

        for device in connected {
            tracing::info!("Device connected: {}", device);
            self.notify(DeviceEvent::Connected(device));
        }

        for serial in disconnected {
            tracing::warn!("Device disconnected: {}", serial);
            let device = devices
                .iter()
                .find(|d| d.serial == serial)
                .cloned()
                .unwrap_or_else(|| DeviceInfo::gone(&serial));
            self.invalidate(&serial);
            self.notify(DeviceEvent::Disconnected(device));
        }

        *last_known = devices
            .iter()
            .filter(|d| d.is_eligible())
            .map(|d| d.serial.clone())
            .collect();
        Ok(())
    }

    /// Drop the cached handle if it belongs to `serial`. The serial stays
    /// preferred for the next selection.
    fn invalidate(&self, serial: &str) {
        let mut session = self.session();
        if session.active_serial.as_deref() == Some(serial) && session.cached.take().is_some() {
            tracing::info!("Active device handle cleared for {}", serial);
        }
    }

    fn notify(&self, event: DeviceEvent) {
        let (callbacks, device, label) = match &event {
            DeviceEvent::Connected(d) => (&self.inner.connect_callbacks, d, "on_connect"),
            DeviceEvent::Disconnected(d) => (&self.inner.disconnect_callbacks, d, "on_disconnect"),
        };

        // Snapshot so a callback may register further callbacks.
        let snapshot: Vec<DeviceCallback> = callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for callback in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(device))) {
                tracing::warn!("{} callback error: {}", label, panic_message(payload.as_ref()));
            }
        }

        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
