//! Scripted device channel for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::channel::{AdbError, DeviceChannel};
use super::device::parse_device_list;

/// Answers discovery with a settable listing and `getprop` from a table.
pub(crate) struct ScriptedChannel {
    listing: Mutex<String>,
    props: Mutex<HashMap<(String, String), String>>,
    fail_discovery: AtomicBool,
    discover_delay: Mutex<Duration>,
    discover_calls: AtomicUsize,
    get_state_calls: AtomicUsize,
    getprop_calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedChannel {
    pub(crate) fn new(listing: &str) -> Self {
        Self {
            listing: Mutex::new(listing.to_string()),
            props: Mutex::new(HashMap::new()),
            fail_discovery: AtomicBool::new(false),
            discover_delay: Mutex::new(Duration::ZERO),
            discover_calls: AtomicUsize::new(0),
            get_state_calls: AtomicUsize::new(0),
            getprop_calls: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set_listing(&self, listing: &str) {
        *self.listing.lock().unwrap() = listing.to_string();
    }

    pub(crate) fn set_prop(&self, serial: &str, prop: &str, value: &str) {
        self.props
            .lock()
            .unwrap()
            .insert((serial.to_string(), prop.to_string()), value.to_string());
    }

    pub(crate) fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make every discovery take `delay` before answering.
    pub(crate) fn delay_discovery(&self, delay: Duration) {
        *self.discover_delay.lock().unwrap() = delay;
    }

    pub(crate) fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn get_state_calls(&self) -> usize {
        self.get_state_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn getprop_calls(&self, serial: &str) -> usize {
        self.getprop_calls
            .lock()
            .unwrap()
            .get(serial)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DeviceChannel for ScriptedChannel {
    async fn discover(&self) -> Result<String, AdbError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.discover_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(AdbError::CommandFailed("cannot connect to daemon".to_string()));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn query(&self, serial: &str, args: &[&str]) -> Result<String, AdbError> {
        match args {
            ["get-state"] => {
                self.get_state_calls.fetch_add(1, Ordering::SeqCst);
                let listing = self.listing.lock().unwrap().clone();
                parse_device_list(&listing)
                    .into_iter()
                    .find(|d| d.serial == serial && d.is_eligible())
                    .map(|_| "device".to_string())
                    .ok_or_else(|| {
                        AdbError::CommandFailed(format!("device '{}' not found", serial))
                    })
            }
            ["shell", "getprop", prop] => {
                *self
                    .getprop_calls
                    .lock()
                    .unwrap()
                    .entry(serial.to_string())
                    .or_default() += 1;
                Ok(self
                    .props
                    .lock()
                    .unwrap()
                    .get(&(serial.to_string(), prop.to_string()))
                    .cloned()
                    .unwrap_or_default())
            }
            other => Err(AdbError::CommandFailed(format!(
                "unscripted command: {}",
                other.join(" ")
            ))),
        }
    }
}
