//! Tool dispatch: the registry of callable tools and the dispatcher that
//! runs model-requested calls against it.

mod call;
mod device_status;
mod dispatcher;
mod rate_limit;
mod registry;

pub use call::{ToolCall, ToolCallError, ToolResult};
pub use device_status::DeviceStatusTool;
pub use dispatcher::{DispatcherConfig, ToolDispatcher};
pub use rate_limit::{RateLimiter, RateWindow, DEFAULT_RATE_LIMIT, RATE_WINDOW};
pub use registry::{BlockingTool, RegisteredTool, Tool, ToolDefinition, ToolError, ToolRegistry};
