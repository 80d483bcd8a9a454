//! Background loop that watches device connectivity.
//!
//! The loop polls discovery at a fixed interval, diffs the set of eligible
//! serials against the previous poll and lets the [`DeviceManager`] fire
//! connect/disconnect events. It runs on its own tokio task, independent of
//! request handling.
//!
//! [`DeviceManager`]: super::DeviceManager

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::device::DeviceInfo;
use super::manager::WeakDeviceManager;

/// Default polling interval in seconds.
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;

/// Default time to wait for the loop to exit on stop, in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Configuration for the reconnect loop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between discovery polls.
    pub interval: Duration,
    /// Upper bound on how long `stop` waits for the loop to exit.
    pub stop_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_RECONNECT_INTERVAL_SECS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }
}

impl ReconnectConfig {
    /// Set the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the stop timeout.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

/// Handle owning a running reconnect loop.
pub(crate) struct ReconnectHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
    stop_timeout: Duration,
}

impl ReconnectHandle {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Clear the running flag, wake the loop and wait for it to exit.
    /// Returns `false` if the stop timeout elapsed and the task was aborted.
    pub(crate) async fn stop(self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        let mut task = self.task;
        match timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Reconnect loop ended abnormally: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!(
                    "Reconnect loop did not stop within {:?}, aborting",
                    self.stop_timeout
                );
                task.abort();
                false
            }
        }
    }
}

/// Spawn the loop on the current tokio runtime.
pub(crate) fn spawn(manager: WeakDeviceManager, config: ReconnectConfig) -> ReconnectHandle {
    let running = Arc::new(AtomicBool::new(true));
    let wake = Arc::new(Notify::new());

    let task = tokio::spawn(run(manager, config.interval, running.clone(), wake.clone()));

    ReconnectHandle {
        running,
        wake,
        task,
        stop_timeout: config.stop_timeout,
    }
}

async fn run(
    manager: WeakDeviceManager,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    tracing::debug!("ADB reconnect loop started");
    let mut last_known = HashSet::new();

    while running.load(Ordering::SeqCst) {
        // Every manager clone dropped: nobody is left to observe events.
        let Some(current) = manager.upgrade() else {
            break;
        };

        if let Err(e) = current.poll_once(&mut last_known).await {
            tracing::debug!("Reconnect loop error (non-fatal): {}", e);
        }
        drop(current);

        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = sleep(interval) => {}
            _ = wake.notified() => {}
        }
    }

    tracing::debug!("ADB reconnect loop stopped");
}

/// Compare the eligible devices in `devices` with the serials seen online
/// last time. Returns the newly online devices in discovery order and the
/// serials that went away, sorted.
pub(crate) fn diff_online(
    previous: &HashSet<String>,
    devices: &[DeviceInfo],
) -> (Vec<DeviceInfo>, Vec<String>) {
    let current: HashSet<&str> = devices
        .iter()
        .filter(|d| d.is_eligible())
        .map(|d| d.serial.as_str())
        .collect();

    let connected = devices
        .iter()
        .filter(|d| d.is_eligible() && !previous.contains(&d.serial))
        .cloned()
        .collect();

    let mut disconnected: Vec<String> = previous
        .iter()
        .filter(|s| !current.contains(s.as_str()))
        .cloned()
        .collect();
    disconnected.sort();

    (connected, disconnected)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::adb::device::DeviceState;
    use crate::adb::testing::ScriptedChannel;
    use crate::adb::DeviceManager;

    #[test]
    fn test_reconnect_config_builder() {
        let config = ReconnectConfig::default()
            .with_interval(Duration::from_millis(250))
            .with_stop_timeout(Duration::from_secs(1));
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_diff_online() {
        let previous: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let devices = vec![
            DeviceInfo::new("B", DeviceState::AuthorizedOnline),
            DeviceInfo::new("C", DeviceState::AuthorizedOnline),
            DeviceInfo::new("D", DeviceState::Unauthorized),
        ];

        let (connected, disconnected) = diff_online(&previous, &devices);
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].serial, "C");
        assert_eq!(disconnected, vec!["A".to_string()]);
    }

    #[test]
    fn test_diff_online_offline_counts_as_gone() {
        let previous: HashSet<String> = ["A".to_string()].into_iter().collect();
        let devices = vec![DeviceInfo::new("A", DeviceState::AuthorizedOffline)];
        let (connected, disconnected) = diff_online(&previous, &devices);
        assert!(connected.is_empty());
        assert_eq!(disconnected, vec!["A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reports_transitions_and_stops() {
        let channel = Arc::new(ScriptedChannel::new("List of devices attached\nA device\n"));
        let manager = DeviceManager::new(channel.clone());
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (c, d) = (connects.clone(), disconnects.clone());
        manager.on_connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        manager.on_disconnect(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        let config = ReconnectConfig::default().with_interval(Duration::from_secs(1));
        assert!(manager.start_auto_reconnect(config.clone()));
        assert!(!manager.start_auto_reconnect(config));
        assert!(manager.is_reconnecting());

        sleep(Duration::from_millis(500)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        channel.set_listing("List of devices attached\n");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        assert!(manager.stop_auto_reconnect().await);
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_discovery_errors() {
        let channel = Arc::new(ScriptedChannel::new("List of devices attached\n"));
        channel.fail_discovery(true);
        let manager = DeviceManager::new(channel.clone());
        let connects = Arc::new(AtomicUsize::new(0));
        let c = connects.clone();
        manager.on_connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        manager.start_auto_reconnect(
            ReconnectConfig::default().with_interval(Duration::from_secs(1)),
        );
        sleep(Duration::from_millis(2500)).await;
        assert!(channel.discover_calls() >= 2);

        channel.fail_discovery(false);
        channel.set_listing("List of devices attached\nA device\n");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        assert!(manager.stop_auto_reconnect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_loop_stuck_past_timeout() {
        let channel = Arc::new(ScriptedChannel::new("List of devices attached\nA device\n"));
        channel.delay_discovery(Duration::from_secs(60));
        let manager = DeviceManager::new(channel.clone());

        let config = ReconnectConfig::default()
            .with_interval(Duration::from_secs(1))
            .with_stop_timeout(Duration::from_secs(2));
        assert!(manager.start_auto_reconnect(config));

        sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.discover_calls(), 1);

        let started = tokio::time::Instant::now();
        assert!(!manager.stop_auto_reconnect().await);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(!manager.is_reconnecting());
    }
}
