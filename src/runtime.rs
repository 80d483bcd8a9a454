//! Runtime composition of the device manager, tool dispatcher and
//! conversation memory.

use std::path::PathBuf;
use std::sync::Arc;

use crate::adb::{AdbChannel, DeviceChannel, DeviceManager};
use crate::memory::{ContextMessage, ConversationMemory, MemoryError, Role};
use crate::settings::RuntimeSettings;
use crate::tools::{DeviceStatusTool, ToolCall, ToolDispatcher, ToolRegistry, ToolResult};

/// Owns the three runtime managers and their lifecycle.
///
/// # Example
/// ```rust,no_run
/// use aria_runtime::{AgentRuntime, RuntimeSettings};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut runtime = AgentRuntime::from_settings(RuntimeSettings::load());
///     runtime.start().await;
///     // ... drive the model loop ...
///     runtime.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct AgentRuntime {
    settings: RuntimeSettings,
    devices: DeviceManager,
    dispatcher: ToolDispatcher,
    memory: ConversationMemory,
}

impl AgentRuntime {
    /// Build a runtime driving the adb binary named in `settings`.
    pub fn from_settings(settings: RuntimeSettings) -> Self {
        let channel =
            AdbChannel::with_path(settings.adb_path.clone()).with_timeout(settings.adb_command_timeout());
        Self::with_channel(settings, Arc::new(channel))
    }

    /// Build a runtime over any device channel, with the built-in tools
    /// registered.
    pub fn with_channel(settings: RuntimeSettings, channel: Arc<dyn DeviceChannel>) -> Self {
        let devices = DeviceManager::new(channel);
        let mut registry = ToolRegistry::new();
        registry.register(DeviceStatusTool::new(devices.clone()));
        Self::new(settings, devices, registry)
    }

    /// Build a runtime from parts.
    pub fn new(settings: RuntimeSettings, devices: DeviceManager, registry: ToolRegistry) -> Self {
        let dispatcher = ToolDispatcher::with_config(Arc::new(registry), settings.dispatcher_config());
        let memory = ConversationMemory::new(settings.max_history);
        Self {
            settings,
            devices,
            dispatcher,
            memory,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ConversationMemory {
        &mut self.memory
    }

    fn session_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.session_path)
    }

    /// Restore the saved session, start the reconnect loop and apply the
    /// preferred device serial. Failures here are logged, never fatal.
    pub async fn start(&mut self) {
        let path = self.session_path();
        match self.memory.load(&path) {
            Ok(()) => {}
            Err(MemoryError::NotFound(_)) => {
                tracing::info!("No saved session at {}, starting fresh", path.display());
            }
            Err(e) => {
                tracing::warn!("Could not load session memory: {}", e);
            }
        }

        if self.settings.auto_reconnect {
            self.devices
                .start_auto_reconnect(self.settings.reconnect_config());
        }

        if let Some(serial) = self.settings.preferred_serial() {
            if let Err(e) = self.devices.select_device(serial).await {
                tracing::warn!("Preferred device unavailable: {}", e);
            }
        }
    }

    /// Run a batch of model-requested calls and record each outcome in
    /// memory as a user turn, in call order.
    pub async fn run_tool_calls(&mut self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let results = self.dispatcher.execute_batch(calls).await;
        for result in &results {
            self.memory.add_message(Role::User, result.to_llm_content());
        }
        results
    }

    /// Messages to send with the next model request.
    pub fn context(&self) -> Vec<ContextMessage> {
        self.memory.get_context_window(self.settings.context_max_tokens)
    }

    /// Stop the reconnect loop within its stop timeout, then save memory.
    pub async fn shutdown(&mut self) -> Result<(), MemoryError> {
        if !self.devices.stop_auto_reconnect().await {
            tracing::warn!("Reconnect loop did not stop in time and was aborted");
        }
        self.memory.save(self.session_path())
    }
}
