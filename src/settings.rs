//! Runtime settings.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adb::{
    ReconnectConfig, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_RECONNECT_INTERVAL_SECS,
    DEFAULT_STOP_TIMEOUT_SECS,
};
use crate::memory::DEFAULT_MAX_HISTORY;
use crate::tools::{DispatcherConfig, DEFAULT_RATE_LIMIT};

/// Settings for the runtime core that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Path to the adb binary
    pub adb_path: String,
    /// Preferred device serial (optional)
    pub device_serial: String,
    /// Seconds between reconnect polls
    pub reconnect_interval_secs: u64,
    /// Seconds to wait for the reconnect loop to stop
    pub reconnect_stop_timeout_secs: u64,
    /// Timeout for one adb command in seconds
    pub adb_command_timeout_secs: u64,
    /// Start the reconnect loop on startup
    pub auto_reconnect: bool,
    /// Calls per minute for tools without an override
    pub default_rate_limit: usize,
    /// Per-tool calls per minute
    pub tool_rate_limits: HashMap<String, usize>,
    /// Maximum stored conversation turns
    pub max_history: usize,
    /// Token budget of the context window
    pub context_max_tokens: usize,
    /// Session file path
    pub session_path: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            device_serial: String::new(),
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            reconnect_stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            adb_command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            auto_reconnect: true,
            default_rate_limit: DEFAULT_RATE_LIMIT,
            tool_rate_limits: HashMap::new(),
            max_history: DEFAULT_MAX_HISTORY,
            context_max_tokens: 4000,
            session_path: "memory/session.json".to_string(),
        }
    }
}

impl RuntimeSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "aria-runtime")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load settings from a specific file, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let mut loaded: Self = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        loaded.backfill();
        loaded
    }

    // Older or hand-edited files may carry empty or zero values.
    fn backfill(&mut self) {
        let defaults = Self::default();

        if self.adb_path.is_empty() {
            self.adb_path = defaults.adb_path;
        }
        if self.reconnect_interval_secs == 0 {
            self.reconnect_interval_secs = defaults.reconnect_interval_secs;
        }
        if self.reconnect_stop_timeout_secs == 0 {
            self.reconnect_stop_timeout_secs = defaults.reconnect_stop_timeout_secs;
        }
        if self.adb_command_timeout_secs == 0 {
            self.adb_command_timeout_secs = defaults.adb_command_timeout_secs;
        }
        if self.default_rate_limit == 0 {
            self.default_rate_limit = defaults.default_rate_limit;
        }
        if self.max_history == 0 {
            self.max_history = defaults.max_history;
        }
        if self.context_max_tokens == 0 {
            self.context_max_tokens = defaults.context_max_tokens;
        }
        if self.session_path.is_empty() {
            self.session_path = defaults.session_path;
        }
    }

    /// Apply `ARIA_*` environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid {}={:?}", key, raw);
                    None
                }
            }
        }

        if let Some(path) = lookup("ARIA_ADB_PATH").filter(|v| !v.is_empty()) {
            self.adb_path = path;
        }
        if let Some(secs) = parsed::<u64>("ARIA_RECONNECT_INTERVAL", lookup("ARIA_RECONNECT_INTERVAL")) {
            if secs > 0 {
                self.reconnect_interval_secs = secs;
            }
        }
        if let Some(limit) = parsed::<usize>("ARIA_RATE_LIMIT", lookup("ARIA_RATE_LIMIT")) {
            self.default_rate_limit = limit;
        }
        if let Some(max) = parsed::<usize>("ARIA_MAX_HISTORY", lookup("ARIA_MAX_HISTORY")) {
            self.max_history = max;
        }
        if let Some(path) = lookup("ARIA_MEMORY_PATH").filter(|v| !v.is_empty()) {
            self.session_path = path;
        }
        if let Some(serial) = lookup("ARIA_DEVICE_SERIAL") {
            self.device_serial = serial.trim().to_string();
        }
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path().ok_or("Cannot determine config directory")?;
        self.save_to(&path)
    }

    /// Save settings to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(path, content).map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Preferred serial, if one is configured.
    pub fn preferred_serial(&self) -> Option<&str> {
        Some(self.device_serial.as_str()).filter(|s| !s.is_empty())
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::default()
            .with_interval(Duration::from_secs(self.reconnect_interval_secs))
            .with_stop_timeout(Duration::from_secs(self.reconnect_stop_timeout_secs))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        self.tool_rate_limits.iter().fold(
            DispatcherConfig::default().with_rate_limit(self.default_rate_limit),
            |config, (name, limit)| config.with_tool_limit(name.clone(), *limit),
        )
    }

    pub fn adb_command_timeout(&self) -> Duration {
        Duration::from_secs(self.adb_command_timeout_secs)
    }
}
