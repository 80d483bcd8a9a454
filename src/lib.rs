// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Aria Runtime
//!
//! Runtime core for a voice-driven phone assistant.
//!
//! The crate provides the three managers an orchestration loop needs:
//!
//! - [`tools::ToolDispatcher`] validates, rate-limits and runs the tool calls a
//!   language model requests, turning every failure into a [`tools::ToolResult`].
//! - [`memory::ConversationMemory`] keeps a bounded, token-budgeted history
//!   and persists it as a JSON session file.
//! - [`adb::DeviceManager`] discovers Android devices over ADB, tracks the
//!   active one and reconnects in the background.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aria_runtime::tools::ToolCall;
//! use aria_runtime::{AgentRuntime, RuntimeSettings};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = AgentRuntime::from_settings(RuntimeSettings::load());
//!     runtime.start().await;
//!
//!     let calls = vec![ToolCall::new("device_status", json!({}))];
//!     for result in runtime.run_tool_calls(&calls).await {
//!         println!("{}", result.to_llm_content());
//!     }
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::any::Any;

pub mod adb;
pub mod memory;
pub mod runtime;
pub mod settings;
pub mod tools;

pub use adb::{DeviceError, DeviceInfo, DeviceManager, ReconnectConfig};
pub use memory::{ConversationMemory, MemoryError, Role};
pub use runtime::AgentRuntime;
pub use settings::RuntimeSettings;
pub use tools::{Tool, ToolCall, ToolDispatcher, ToolError, ToolRegistry, ToolResult};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
