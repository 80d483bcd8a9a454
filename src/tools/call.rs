//! Tool call requests and their results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors normalising a raw tool call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Tool call is not a JSON object")]
    NotAnObject,
    #[error("Tool call has no name")]
    MissingName,
    #[error("Tool call arguments are not valid JSON: {0}")]
    MalformedArguments(String),
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments as received. Anything but an object fails validation.
    pub arguments: Value,
    pub call_id: String,
}

impl ToolCall {
    /// Create a call with a generated id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Set the call id.
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    /// Normalise a loosely shaped call.
    ///
    /// Accepts `arguments` or `input` for the arguments and `call_id` or
    /// `id` for the identifier. Arguments given as a JSON-encoded string are
    /// decoded. Missing arguments become an empty object and a missing id an
    /// empty string.
    pub fn from_value(value: &Value) -> Result<Self, ToolCallError> {
        let obj = value.as_object().ok_or(ToolCallError::NotAnObject)?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or(ToolCallError::MissingName)?
            .to_string();

        let arguments = match obj.get("arguments").or_else(|| obj.get("input")) {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .map_err(|e| ToolCallError::MalformedArguments(e.to_string()))?,
            Some(other) => other.clone(),
        };

        let call_id = obj
            .get("call_id")
            .or_else(|| obj.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            name,
            arguments,
            call_id,
        })
    }

    /// The arguments as an object, if they are one.
    pub fn argument_map(&self) -> Option<&Map<String, Value>> {
        self.arguments.as_object()
    }
}

/// Outcome of one tool call. `error` is set exactly when the call failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: f64,
    pub call_id: String,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(call: &ToolCall, result: Value, duration_ms: f64) -> Self {
        Self {
            tool_name: call.name.clone(),
            result: Some(result),
            error: None,
            duration_ms,
            call_id: call.call_id.clone(),
        }
    }

    /// Create a failure result.
    pub fn failure(call: &ToolCall, error: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            tool_name: call.name.clone(),
            result: None,
            error: Some(error.into()),
            duration_ms,
            call_id: call.call_id.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Render the result as text to feed back to the model.
    pub fn to_llm_content(&self) -> String {
        match (&self.error, &self.result) {
            (Some(error), _) => format!("[Tool error: {}]", error),
            (None, None) | (None, Some(Value::Null)) => "[Tool returned no result]".to_string(),
            (None, Some(Value::String(text))) => text.clone(),
            (None, Some(other)) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_aliases() {
        let call = ToolCall::from_value(&json!({
            "name": "sms",
            "input": {"to": "mom"},
            "id": "toolu_1"
        }))
        .unwrap();
        assert_eq!(call.name, "sms");
        assert_eq!(call.arguments, json!({"to": "mom"}));
        assert_eq!(call.call_id, "toolu_1");
    }

    #[test]
    fn test_from_value_decodes_string_arguments() {
        let call = ToolCall::from_value(&json!({
            "name": "weather",
            "arguments": "{\"location\": \"Paris\"}",
            "call_id": "c1"
        }))
        .unwrap();
        assert_eq!(call.arguments, json!({"location": "Paris"}));

        let err = ToolCall::from_value(&json!({"name": "weather", "arguments": "{oops"}));
        assert!(matches!(err, Err(ToolCallError::MalformedArguments(_))));
    }

    #[test]
    fn test_from_value_defaults_and_errors() {
        let call = ToolCall::from_value(&json!({"name": "ping"})).unwrap();
        assert_eq!(call.arguments, json!({}));
        assert_eq!(call.call_id, "");

        assert_eq!(
            ToolCall::from_value(&json!(["ping"])),
            Err(ToolCallError::NotAnObject)
        );
        assert_eq!(
            ToolCall::from_value(&json!({"arguments": {}})),
            Err(ToolCallError::MissingName)
        );
    }

    #[test]
    fn test_new_generates_distinct_ids() {
        let a = ToolCall::new("ping", json!({}));
        let b = ToolCall::new("ping", json!({}));
        assert!(a.call_id.starts_with("call_"));
        assert_ne!(a.call_id, b.call_id);
    }

    #[test]
    fn test_llm_content() {
        let call = ToolCall::new("ping", json!({}));
        assert_eq!(
            ToolResult::success(&call, json!("pong"), 1.0).to_llm_content(),
            "pong"
        );
        assert_eq!(
            ToolResult::success(&call, Value::Null, 1.0).to_llm_content(),
            "[Tool returned no result]"
        );
        let failed = ToolResult::failure(&call, "boom", 1.0);
        assert!(!failed.succeeded());
        assert_eq!(failed.to_llm_content(), "[Tool error: boom]");
    }
}
