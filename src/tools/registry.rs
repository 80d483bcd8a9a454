//! Tool abstraction and the registry handed to the dispatcher.
//!
//! Tools come in two flavours: [`Tool`] suspends cooperatively on the async
//! runtime, [`BlockingTool`] blocks its thread (shelling out, sleeping, file
//! IO). The registry stores both behind [`RegisteredTool`] so callers never
//! need to know which kind a name refers to.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::adb::{AdbError, DeviceError};

/// Errors a tool reports from its own execution.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool rejected the shape of its arguments.
    #[error("{0}")]
    BadArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Adb(#[from] AdbError),
    #[error("{0}")]
    Device(#[from] DeviceError),
}

impl ToolError {
    /// Short classification used as the prefix of the result error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadArguments(_) => "BadArguments",
            Self::Failed(_) => "ExecutionError",
            Self::Io(_) => "IoError",
            Self::Adb(_) | Self::Device(_) => "DeviceError",
        }
    }
}

/// A tool that runs on the async runtime.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call this tool.
    fn name(&self) -> &str;

    /// What the tool does, shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments. Only `required` is enforced by the
    /// dispatcher.
    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError>;
}

/// A tool that blocks the calling thread. The dispatcher runs it on the
/// blocking thread pool.
pub trait BlockingTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError>;
}

/// A registered tool of either kind.
#[derive(Clone)]
pub enum RegisteredTool {
    Async(Arc<dyn Tool>),
    Blocking(Arc<dyn BlockingTool>),
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        match self {
            Self::Async(t) => t.name(),
            Self::Blocking(t) => t.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Async(t) => t.description(),
            Self::Blocking(t) => t.description(),
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            Self::Async(t) => t.input_schema(),
            Self::Blocking(t) => t.input_schema(),
        }
    }

    /// Field names listed under `required` in the input schema.
    pub fn required_fields(&self) -> Vec<String> {
        self.input_schema()
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Provider-neutral description of a tool for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Maps tool names to tools. Built once at startup and shared by reference.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.insert(RegisteredTool::Async(Arc::new(tool)))
    }

    /// Register a blocking tool, replacing any tool with the same name.
    pub fn register_blocking<T: BlockingTool + 'static>(&mut self, tool: T) -> &mut Self {
        self.insert(RegisteredTool::Blocking(Arc::new(tool)))
    }

    fn insert(&mut self, tool: RegisteredTool) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(RegisteredTool::definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
