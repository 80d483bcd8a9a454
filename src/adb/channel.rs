//! Command channel to the ADB server.
//!
//! Everything the device session layer knows about the bridge goes through
//! [`DeviceChannel`]: one discovery command and per-device queries. The
//! production implementation shells out to the `adb` binary.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Default timeout for a single adb invocation, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// ADB connection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdbError {
    #[error("Command timed out after {0}s")]
    Timeout(u64),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
    #[error("ADB binary not found at '{0}'")]
    BinaryNotFound(String),
}

/// Abstract access to a device bridge.
///
/// `discover` returns the raw listing (the `adb devices -l` format) and
/// `query` runs a command against one device, returning its stdout.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Run the discovery command.
    async fn discover(&self) -> Result<String, AdbError>;

    /// Run `args` against the device identified by `serial`.
    async fn query(&self, serial: &str, args: &[&str]) -> Result<String, AdbError>;
}

/// [`DeviceChannel`] backed by the `adb` command-line tool.
///
/// # Example
/// ```rust,no_run
/// use aria_runtime::adb::{AdbChannel, DeviceChannel};
///
/// # async fn demo() -> Result<(), aria_runtime::adb::AdbError> {
/// let adb = AdbChannel::new();
/// adb.connect("192.168.1.100").await?;
/// let listing = adb.discover().await?;
/// println!("{listing}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdbChannel {
    adb_path: String,
    command_timeout: Duration,
}

impl Default for AdbChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbChannel {
    /// Create a channel using `adb` from `PATH`.
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    /// Create a channel with a custom adb binary path.
    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Set the per-command timeout.
    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Path of the adb binary in use.
    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    /// Connect to a remote device over TCP/IP. Port 5555 is assumed when
    /// `address` has none.
    pub async fn connect(&self, address: &str) -> Result<String, AdbError> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:5555", address)
        };

        let output = self.run(&["connect", &address]).await?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        parse_connect_output(&address, &combined)
    }

    /// Disconnect a remote device, or every remote device when `address` is `None`.
    pub async fn disconnect(&self, address: Option<&str>) -> Result<String, AdbError> {
        let output = match address {
            Some(addr) => self.run(&["disconnect", addr]).await?,
            None => self.run(&["disconnect"]).await?,
        };
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<Output, AdbError> {
        tracing::debug!("ADB: {} {}", self.adb_path, args.join(" "));

        let child = Command::new(&self.adb_path)
            .args(args)
            .kill_on_drop(true)
            .output();

        match timeout(self.command_timeout, child).await {
            Err(_) => Err(AdbError::Timeout(self.command_timeout.as_secs())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AdbError::BinaryNotFound(self.adb_path.clone()))
            }
            Ok(Err(e)) => Err(AdbError::CommandFailed(e.to_string())),
            Ok(Ok(output)) => Ok(output),
        }
    }

    /// Run a command and return stdout, failing on a non-zero exit that
    /// reported an error on stderr. Some adb subcommands exit non-zero while
    /// still producing usable output.
    async fn run_checked(&self, args: &[&str]) -> Result<String, AdbError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lowered = stderr.to_lowercase();
            if lowered.contains("error") || lowered.contains("failed") {
                return Err(AdbError::CommandFailed(format!("{}: {}", args.join(" "), stderr)));
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl DeviceChannel for AdbChannel {
    async fn discover(&self) -> Result<String, AdbError> {
        self.run_checked(&["devices", "-l"]).await
    }

    async fn query(&self, serial: &str, args: &[&str]) -> Result<String, AdbError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(&device_prefix(serial));
        full.extend_from_slice(args);
        self.run_checked(&full).await
    }
}

/// Interpret the output of `adb connect`. "already connected to" counts as
/// success.
pub(crate) fn parse_connect_output(address: &str, output: &str) -> Result<String, AdbError> {
    if output.to_lowercase().contains("connected to") {
        Ok(format!("Connected to {}", address))
    } else {
        Err(AdbError::Connection(output.trim().to_string()))
    }
}

/// Arguments that target one device.
pub(crate) fn device_prefix(serial: &str) -> [&str; 2] {
    ["-s", serial]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adb_channel_new() {
        let adb = AdbChannel::new();
        assert_eq!(adb.adb_path(), "adb");
        assert_eq!(
            adb.command_timeout,
            Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_parse_connect_output() {
        assert_eq!(
            parse_connect_output("192.168.1.7:5555", "connected to 192.168.1.7:5555\n").unwrap(),
            "Connected to 192.168.1.7:5555"
        );
        assert!(parse_connect_output(
            "192.168.1.7:5555",
            "already connected to 192.168.1.7:5555"
        )
        .is_ok());

        let err = parse_connect_output(
            "10.0.0.9:5555",
            "failed to connect to '10.0.0.9:5555': Connection refused\n",
        )
        .unwrap_err();
        assert_eq!(
            err,
            AdbError::Connection(
                "failed to connect to '10.0.0.9:5555': Connection refused".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_report_missing_binary() {
        let channel = AdbChannel::with_path("/nonexistent/adb-binary");
        assert_eq!(
            channel.connect("192.168.1.7").await,
            Err(AdbError::BinaryNotFound("/nonexistent/adb-binary".to_string()))
        );
        assert_eq!(
            channel.disconnect(None).await,
            Err(AdbError::BinaryNotFound("/nonexistent/adb-binary".to_string()))
        );
    }

    #[test]
    fn test_device_prefix() {
        assert_eq!(device_prefix("emulator-5554"), ["-s", "emulator-5554"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_classified() {
        let adb = AdbChannel::with_path("/nonexistent/definitely-not-adb");
        let err = adb.discover().await.unwrap_err();
        assert_eq!(
            err,
            AdbError::BinaryNotFound("/nonexistent/definitely-not-adb".to_string())
        );
    }
}
