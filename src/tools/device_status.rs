//! Built-in tool reporting on the active device.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::registry::{Tool, ToolError};
use crate::adb::DeviceManager;

/// Reads properties of whichever device the session manager has active.
///
/// With no arguments it returns model, manufacturer and versions; with
/// `property` it returns that single system property.
pub struct DeviceStatusTool {
    devices: DeviceManager,
}

impl DeviceStatusTool {
    pub fn new(devices: DeviceManager) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl Tool for DeviceStatusTool {
    fn name(&self) -> &str {
        "device_status"
    }

    fn description(&self) -> &str {
        "Report the connected phone's model, manufacturer and Android version, \
         or read one system property."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "property": {
                    "type": "string",
                    "description": "System property to read, e.g. ro.product.model"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let property = match arguments.get("property") {
            None | Some(Value::Null) => None,
            Some(Value::String(p)) if !p.trim().is_empty() => Some(p.trim().to_string()),
            Some(_) => {
                return Err(ToolError::BadArguments(
                    "property must be a non-empty string".to_string(),
                ))
            }
        };

        let device = self.devices.get_device().await?;

        match property {
            Some(prop) => {
                let value = device.getprop(&prop).await?;
                Ok(json!({ "serial": device.serial(), "property": prop, "value": value }))
            }
            None => {
                let props = device.properties().await;
                Ok(json!({
                    "serial": device.serial(),
                    "model": props.model,
                    "manufacturer": props.manufacturer,
                    "android_version": props.os_version,
                    "sdk_version": props.sdk_version,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adb::testing::ScriptedChannel;
    use crate::tools::{ToolCall, ToolDispatcher, ToolRegistry};

    fn dispatcher(listing: &str) -> (ToolDispatcher, Arc<ScriptedChannel>) {
        let channel = Arc::new(ScriptedChannel::new(listing));
        let mut registry = ToolRegistry::new();
        registry.register(DeviceStatusTool::new(DeviceManager::new(channel.clone())));
        (ToolDispatcher::new(Arc::new(registry)), channel)
    }

    #[tokio::test]
    async fn test_reports_active_device() {
        let (dispatcher, channel) = dispatcher("List of devices attached\nA device\n");
        channel.set_prop("A", "ro.product.model", "Pixel 8");

        let result = dispatcher
            .execute(&ToolCall::new("device_status", json!({})))
            .await;
        let value = result.result.unwrap();
        assert_eq!(value["serial"], "A");
        assert_eq!(value["model"], "Pixel 8");
        assert_eq!(value["sdk_version"], "unknown");
    }

    #[tokio::test]
    async fn test_reads_single_property() {
        let (dispatcher, channel) = dispatcher("List of devices attached\nA device\n");
        channel.set_prop("A", "persist.sys.locale", "en-US");

        let result = dispatcher
            .execute(&ToolCall::new(
                "device_status",
                json!({"property": "persist.sys.locale"}),
            ))
            .await;
        assert_eq!(result.result.unwrap()["value"], "en-US");
    }

    #[tokio::test]
    async fn test_no_device_is_a_tool_error() {
        let (dispatcher, _) = dispatcher("List of devices attached\n");
        let result = dispatcher
            .execute(&ToolCall::new("device_status", json!({})))
            .await;
        assert!(result
            .error
            .unwrap()
            .starts_with("DeviceError: No authorized Android device connected"));
    }

    #[tokio::test]
    async fn test_rejects_non_string_property() {
        let (dispatcher, _) = dispatcher("List of devices attached\nA device\n");
        let result = dispatcher
            .execute(&ToolCall::new("device_status", json!({"property": 7})))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("Bad arguments for device_status: property must be a non-empty string")
        );
    }
}
