use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AgentError;

/// Prepended to every new conversation. Enforcement lives in the tools; this
/// only tells the model where the fences are.
pub const SECURITY_SYSTEM_PROMPT: &str = "SECURITY RESTRICTIONS - CRITICAL:
1. .env files and their variants (.env.*, *.env) are STRICTLY FORBIDDEN from being read or accessed
2. This restriction applies to ALL tools including bash, cat, read, and any file operations
3. DO NOT attempt any workarounds or indirect methods to access .env files
4. You are restricted to working within the current working directory and its subdirectories
5. Use the 'read' tool for file access - do not use bash commands like 'cat' to read files
6. Any attempt to violate these restrictions will be blocked
These rules are enforced at the tool level and cannot be bypassed.";

/// Top-level application configuration, loaded from TOML and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub session: SessionConfig,
    pub system_prompt: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            server: ServerConfig::default(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
            system_prompt: SECURITY_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from default path (~/.config/klaudkod/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("klaudkod")
            .join("config.toml")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), AgentError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_BASE_URL") {
            self.provider.api_base = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = get("SERVER_PORT") {
            self.server.port = v
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("SERVER_PORT is not a port: {}", v)))?;
        }
        if let Some(v) = get("TOOLS_ENABLED") {
            self.tools.enabled = parse_bool(&v)
                .ok_or_else(|| AgentError::Config(format!("TOOLS_ENABLED is not a boolean: {}", v)))?;
        }
        if let Some(v) = get("PERMISSION_MODE") {
            self.tools.permission_mode = v.parse()?;
        }
        if let Some(v) = get("COMMAND_TIMEOUT") {
            self.tools.command_timeout_secs = v.trim().parse().map_err(|_| {
                AgentError::Config(format!("COMMAND_TIMEOUT is not a number of seconds: {}", v))
            })?;
        }
        if let Some(v) = get("WORKING_DIR") {
            self.tools.working_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// The confinement root: the configured working directory, else the cwd.
    pub fn working_dir(&self) -> Result<PathBuf, AgentError> {
        match &self.tools.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    /// Model name (e.g. "gpt-4", "llama3", etc.).
    pub model: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Maximum tokens to generate per model turn.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4".into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Enable permissive CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors: true,
        }
    }
}

/// Tool runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Expose tools to the model at all.
    pub enabled: bool,
    pub permission_mode: PermissionMode,
    /// Default `bash` timeout when the model does not pass one.
    pub command_timeout_secs: u64,
    /// Confinement root for file tools. Defaults to the process cwd.
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            permission_mode: PermissionMode::Auto,
            command_timeout_secs: 120,
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    Ask,
    Auto,
}

impl std::str::FromStr for PermissionMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(PermissionMode::Ask),
            "auto" => Ok(PermissionMode::Auto),
            other => Err(AgentError::Config(format!(
                "PERMISSION_MODE must be 'ask' or 'auto', got '{}'",
                other
            ))),
        }
    }
}

/// Per-connection session limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model turns with tool calls allowed per prompt.
    pub max_tool_iterations: usize,
    /// Frames buffered for a client before it is considered too slow.
    pub outbound_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 50,
            outbound_capacity: 256,
            max_message_size: 512 * 1024,
        }
    }
}
