use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    BadArguments(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("access denied: path '{}' is outside the working directory", .0.display())]
    PathEscape(PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read directory: {}", .0.display())]
    IsDirectory(PathBuf),

    #[error("cannot read binary file: {}", .0.display())]
    BinaryFile(PathBuf),

    #[error("invalid pattern: {0}")]
    BadPattern(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("maximum tool iterations ({0}) reached")]
    IterationLimit(usize),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Shorthand for a failure inside a named tool.
    pub fn tool(tool_name: &str, message: impl Into<String>) -> Self {
        AgentError::ToolExecution {
            tool_name: tool_name.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
