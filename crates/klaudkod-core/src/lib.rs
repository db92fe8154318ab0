pub mod agent_loop;
pub mod config;
pub mod error;
pub mod provider;
pub mod tool_registry;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use agent_loop::{AgentRun, LlmClient};
pub use config::{AppConfig, PermissionMode};
pub use error::AgentError;
pub use provider::{ChatProvider, OpenAiProvider};
pub use tool_registry::{Tool, ToolContext, ToolExecutor, ToolRegistry};
pub use types::{Message, Role, StreamEvent, ToolCall, ToolResult, ToolSchema};
