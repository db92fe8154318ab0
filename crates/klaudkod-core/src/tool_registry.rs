use crate::config::PermissionMode;
use crate::error::AgentError;
use crate::types::{ToolResult, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-invocation context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Cancelled when the prompt is cancelled or the connection drops.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            session_id: session_id.into(),
            cancel,
        }
    }
}

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (used in function calling).
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    ///
    /// Returning `Err` is fine; the registry turns it into an error result.
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError>;
}

/// Runs a tool call on behalf of the agent loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, name: &str, arguments: &str) -> ToolResult;
}

/// Central registry for all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    working_dir: PathBuf,
    permission_mode: PermissionMode,
}

impl ToolRegistry {
    /// Create an empty registry rooted at `working_dir`, which must be an
    /// existing directory. The root is stored in canonical form.
    pub fn new(working_dir: impl AsRef<Path>, permission_mode: PermissionMode) -> Result<Self, AgentError> {
        let raw = working_dir.as_ref();
        let working_dir = raw.canonicalize().map_err(|e| {
            AgentError::Config(format!("working directory '{}': {}", raw.display(), e))
        })?;
        if !working_dir.is_dir() {
            return Err(AgentError::Config(format!(
                "working directory '{}' is not a directory",
                working_dir.display()
            )));
        }

        Ok(Self {
            tools: HashMap::new(),
            working_dir,
            permission_mode,
        })
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// List all registered tool names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Canonical confinement root shared by all file tools.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permission_mode
    }

    /// Get the tool schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Permission hook run before every dispatch.
    ///
    /// There is no interactive approval channel, so `ask` falls through to
    /// the same decision as `auto`.
    pub fn authorize(&self, _tool_name: &str) -> Result<(), AgentError> {
        match self.permission_mode {
            PermissionMode::Auto | PermissionMode::Ask => Ok(()),
        }
    }

    /// Execute a tool by name with JSON-encoded arguments. Never fails:
    /// every error becomes a result with `is_error` set.
    pub async fn execute(&self, ctx: &ToolContext, name: &str, arguments: &str) -> ToolResult {
        let started = Instant::now();
        let result = match self.dispatch(ctx, name, arguments).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(format!("Error: {}", e)),
        };
        debug!(
            session_id = %ctx.session_id,
            tool = name,
            is_error = result.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool finished"
        );
        result
    }

    async fn dispatch(&self, ctx: &ToolContext, name: &str, arguments: &str) -> Result<ToolResult, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        let args = parse_arguments(arguments)?;
        self.authorize(name)?;

        tokio::select! {
            result = tool.execute(ctx, args) => result,
            _ = ctx.cancel.cancelled() => {
                warn!(session_id = %ctx.session_id, tool = name, "Tool cancelled");
                Err(AgentError::Cancelled)
            }
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, ctx: &ToolContext, name: &str, arguments: &str) -> ToolResult {
        ToolRegistry::execute(self, ctx, name, arguments).await
    }
}

/// Parse a tool-call argument blob into a JSON object. An empty blob is
/// treated as `{}`.
fn parse_arguments(arguments: &str) -> Result<Value, AgentError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(arguments)
        .map_err(|e| AgentError::BadArguments(format!("failed to parse arguments: {}", e)))?;
    if !value.is_object() {
        return Err(AgentError::BadArguments(
            "arguments must be a JSON object".into(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError> {
            match args["text"].as_str() {
                Some(text) => Ok(ToolResult::success(text)),
                None => Err(AgentError::BadArguments("text is required".into())),
            }
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never finishes"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolResult, AgentError> {
            std::future::pending().await
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("test", CancellationToken::new())
    }

    fn registry(tmp: &TempDir) -> ToolRegistry {
        let mut registry = ToolRegistry::new(tmp.path(), PermissionMode::Auto).unwrap();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn test_register_twice_keeps_one_entry() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_names(), vec!["echo"]);
        assert_eq!(registry.schemas().len(), 1);
    }

    #[test]
    fn test_schemas_carry_name_description_parameters() {
        let tmp = TempDir::new().unwrap();
        let schemas = registry(&tmp).schemas();
        assert_eq!(schemas[0].name, "echo");
        assert_eq!(schemas[0].description, "Echo the text argument");
        assert_eq!(schemas[0].parameters["required"], json!(["text"]));
    }

    #[test]
    fn test_working_dir_is_canonical() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        assert_eq!(registry.working_dir(), tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_missing_working_dir_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let result = ToolRegistry::new(tmp.path().join("nope"), PermissionMode::Auto);
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let tmp = TempDir::new().unwrap();
        let result = registry(&tmp)
            .execute(&ctx(), "echo", r#"{"text":"hello"}"#)
            .await;
        assert_eq!(result, ToolResult::success("hello"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let tmp = TempDir::new().unwrap();
        let result = registry(&tmp).execute(&ctx(), "nope", "{}").await;
        assert!(result.is_error);
        assert!(result.content.contains("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_is_error_result() {
        let tmp = TempDir::new().unwrap();
        let result = registry(&tmp).execute(&ctx(), "echo", "{\"text\":").await;
        assert!(result.is_error);
        assert!(result.content.contains("Invalid arguments"));

        let result = registry(&tmp).execute(&ctx(), "echo", "[1, 2]").await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_tool_error_is_wrapped() {
        let tmp = TempDir::new().unwrap();
        let result = registry(&tmp).execute(&ctx(), "echo", "{}").await;
        assert!(result.is_error);
        assert!(result.content.contains("text is required"));
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_tool() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);
        registry.register(Arc::new(SleepyTool));

        let ctx = ctx();
        ctx.cancel.cancel();
        let result = registry.execute(&ctx, "sleepy", "").await;
        assert!(result.is_error);
        assert!(result.content.contains("cancelled"));
    }
}
