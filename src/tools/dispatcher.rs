//! Tool dispatcher: validation, admission control and isolated execution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinError;
use tokio::time::Instant;

use super::call::{ToolCall, ToolResult};
use super::rate_limit::{RateLimiter, DEFAULT_RATE_LIMIT};
use super::registry::{RegisteredTool, ToolError, ToolRegistry};
use crate::panic_message;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Calls per minute allowed for tools without an override.
    pub default_rate_limit: usize,
    /// Per-tool overrides of the rate limit.
    pub tool_limits: HashMap<String, usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: DEFAULT_RATE_LIMIT,
            tool_limits: HashMap::new(),
        }
    }
}

impl DispatcherConfig {
    /// Set the default calls-per-minute limit.
    pub fn with_rate_limit(mut self, per_minute: usize) -> Self {
        self.default_rate_limit = per_minute;
        self
    }

    /// Override the limit of one tool.
    pub fn with_tool_limit(mut self, name: impl Into<String>, per_minute: usize) -> Self {
        self.tool_limits.insert(name.into(), per_minute);
        self
    }
}

/// Why a call was turned away before invocation.
enum Rejection {
    RateLimited(usize),
    UnknownTool,
}

/// Why an admitted call failed.
enum InvokeFailure {
    Tool(ToolError),
    Panic(String),
}

fn join_failure(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic().as_ref())
    } else {
        "task cancelled".to_string()
    }
}

/// Executes model-requested tool calls.
///
/// Every call yields exactly one [`ToolResult`]; nothing a tool does can
/// make `execute` or `execute_batch` fail. The dispatcher is cheap to
/// clone and clones share the registry and the rate windows.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use aria_runtime::tools::{DispatcherConfig, ToolCall, ToolDispatcher, ToolRegistry};
///
/// # async fn demo(registry: ToolRegistry) {
/// let config = DispatcherConfig::default().with_tool_limit("ping", 2);
/// let dispatcher = ToolDispatcher::with_config(Arc::new(registry), config);
/// let result = dispatcher
///     .execute(&ToolCall::new("ping", serde_json::json!({})))
///     .await;
/// println!("{}", result.to_llm_content());
/// # }
/// ```
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    limiter: Arc<RateLimiter>,
}

impl ToolDispatcher {
    /// Create a dispatcher with the default rate limit.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, DispatcherConfig::default())
    }

    pub fn with_config(registry: Arc<ToolRegistry>, config: DispatcherConfig) -> Self {
        Self {
            registry,
            limiter: Arc::new(RateLimiter::new(
                config.default_rate_limit,
                config.tool_limits,
            )),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a single tool call.
    ///
    /// Steps: validate required arguments, check the tool's rate window,
    /// resolve the tool, invoke it. Only an actual invocation is recorded in
    /// the rate window.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let tool = self.registry.get(&call.name).cloned();

        if !validate(tool.as_ref(), call) {
            return ToolResult::failure(
                call,
                format!("Invalid arguments for tool '{}'", call.name),
                0.0,
            );
        }

        let now = Instant::now();
        let admitted = match tool {
            Some(tool) => self.limiter.with_window(&call.name, |window, limit| {
                window.evict(now);
                if window.len() >= limit {
                    return Err(Rejection::RateLimited(limit));
                }
                window.record(now);
                Ok(tool)
            }),
            // Unregistered names never record, so their window would be empty.
            None => match self.limiter.limit_for(&call.name) {
                0 => Err(Rejection::RateLimited(0)),
                _ => Err(Rejection::UnknownTool),
            },
        };

        let tool = match admitted {
            Ok(tool) => tool,
            Err(Rejection::RateLimited(limit)) => {
                tracing::warn!("Tool {} rate limited ({}/min)", call.name, limit);
                return ToolResult::failure(
                    call,
                    format!(
                        "Rate limit exceeded for tool '{}' — max {}/min",
                        call.name, limit
                    ),
                    0.0,
                );
            }
            Err(Rejection::UnknownTool) => {
                tracing::warn!("Unknown tool requested: {}", call.name);
                return ToolResult::failure(call, format!("Unknown tool: '{}'", call.name), 0.0);
            }
        };

        let arguments = call.argument_map().cloned().unwrap_or_default();
        let start = Instant::now();
        let outcome = invoke(tool, arguments).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(value) => {
                tracing::info!("Tool {} completed in {:.1}ms", call.name, duration_ms);
                ToolResult::success(call, value, duration_ms)
            }
            Err(InvokeFailure::Tool(ToolError::BadArguments(msg))) => {
                let error = format!("Bad arguments for {}: {}", call.name, msg);
                tracing::warn!("{}", error);
                ToolResult::failure(call, error, duration_ms)
            }
            Err(InvokeFailure::Tool(e)) => {
                tracing::error!("Tool {} raised an error: {}", call.name, e);
                ToolResult::failure(call, format!("{}: {}", e.kind(), e), duration_ms)
            }
            Err(InvokeFailure::Panic(msg)) => {
                tracing::error!("Tool {} panicked: {}", call.name, msg);
                ToolResult::failure(call, format!("Panic: {}", msg), duration_ms)
            }
        }
    }

    /// Execute calls concurrently, one task per call.
    ///
    /// Results come back in input order whatever the completion order, and
    /// one call's failure never affects the others.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        tracing::info!("Executing batch of {} tool calls", calls.len());
        let tasks: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.execute(&call).await })
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (task, call) in tasks.into_iter().zip(calls) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => ToolResult::failure(call, format!("Panic: {}", join_failure(e)), 0.0),
            };
            results.push(result);
        }
        results
    }

    /// Check that every required argument is present and non-null.
    ///
    /// Unknown tools pass; they fail at resolution instead.
    pub fn validate_args(&self, call: &ToolCall) -> bool {
        validate(self.registry.get(&call.name), call)
    }

    /// Calls per tool inside the trailing minute, for monitoring.
    pub fn get_call_stats(&self) -> BTreeMap<String, usize> {
        self.limiter.stats(Instant::now())
    }
}

fn validate(tool: Option<&RegisteredTool>, call: &ToolCall) -> bool {
    let Some(arguments) = call.argument_map() else {
        tracing::warn!("Tool {}: arguments must be an object", call.name);
        return false;
    };

    let Some(tool) = tool else {
        return true;
    };

    for field in tool.required_fields() {
        match arguments.get(&field) {
            None => {
                tracing::warn!("Tool {}: missing required argument '{}'", call.name, field);
                return false;
            }
            Some(Value::Null) => {
                tracing::warn!("Tool {}: required argument '{}' is null", call.name, field);
                return false;
            }
            Some(_) => {}
        }
    }
    true
}

/// Run the tool on its own task so a panic stays contained. Blocking tools
/// go to the blocking pool.
async fn invoke(tool: RegisteredTool, arguments: Map<String, Value>) -> Result<Value, InvokeFailure> {
    let joined = match tool {
        RegisteredTool::Async(tool) => {
            tokio::spawn(async move { tool.execute(arguments).await }).await
        }
        RegisteredTool::Blocking(tool) => {
            tokio::task::spawn_blocking(move || tool.execute(arguments)).await
        }
    };
    joined
        .map_err(|e| InvokeFailure::Panic(join_failure(e)))?
        .map_err(InvokeFailure::Tool)
}
