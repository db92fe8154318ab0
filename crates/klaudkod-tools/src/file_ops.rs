use crate::sandbox::{has_binary_extension, is_credential_file, parse_args, resolve_path};
use klaudkod_core::error::AgentError;
use klaudkod_core::tool_registry::{Tool, ToolContext};
use klaudkod_core::types::ToolResult;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_READ_LIMIT: i64 = 2000;
const MAX_LINE_LENGTH: usize = 2000;

// ── read ───────────────────────────────────────────────────────────────

pub struct ReadTool {
    working_dir: PathBuf,
}

impl ReadTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Supports pagination with offset and limit parameters. \
         Returns file content with line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "The path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "The line number to start reading from (0-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "The number of lines to read (defaults to 2000)"
                }
            },
            "required": ["filePath"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            file_path: String,
            #[serde(default)]
            offset: i64,
            #[serde(default = "default_limit")]
            limit: i64,
        }
        fn default_limit() -> i64 {
            DEFAULT_READ_LIMIT
        }
        let args: Args = parse_args(args)?;

        let path = resolve_path(&self.working_dir, &args.file_path)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AgentError::NotFound(path)),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Err(AgentError::IsDirectory(path));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_credential_file(&file_name) {
            return Err(AgentError::AccessDenied("cannot read .env files".into()));
        }
        if has_binary_extension(&path) {
            return Err(AgentError::BinaryFile(path));
        }

        let bytes = tokio::fs::read(&path).await?;
        if bytes.contains(&0) {
            return Err(AgentError::BinaryFile(path));
        }
        let content = String::from_utf8_lossy(&bytes);

        debug!(path = %path.display(), offset = args.offset, limit = args.limit, "Reading file");
        Ok(ToolResult::success(render_lines(&content, args.offset, args.limit)))
    }
}

/// Number the selected window of lines and close with a continuation or
/// end-of-file hint.
fn render_lines(content: &str, offset: i64, limit: i64) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();
    let start = offset.clamp(0, total as i64) as usize;
    let end = start.saturating_add(limit.max(0) as usize).min(total);

    let mut out = String::from("<file>\n");
    for (i, line) in lines[start..end].iter().enumerate() {
        let _ = writeln!(out, "{:05}| {}", start + i + 1, truncate_line(line));
    }

    if end < total {
        let _ = writeln!(
            out,
            "\n(File has more lines. Use 'offset' parameter to read beyond line {})",
            end
        );
    } else {
        let _ = writeln!(out, "\n(End of file - total {} lines)", total);
    }
    out.push_str("</file>");
    out
}

fn truncate_line(line: &str) -> std::borrow::Cow<'_, str> {
    match line.char_indices().nth(MAX_LINE_LENGTH) {
        Some((cut, _)) => format!("{}...", &line[..cut]).into(),
        None => line.into(),
    }
}

// ── write ──────────────────────────────────────────────────────────────

pub struct WriteTool {
    working_dir: PathBuf,
}

impl WriteTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if it doesn't exist or overwriting if it does. \
         Supports creating parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["filePath", "content"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            file_path: String,
            content: String,
        }
        let args: Args = parse_args(args)?;

        let path = resolve_path(&self.working_dir, &args.file_path)?;
        let existed = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_dir() => return Err(AgentError::IsDirectory(path)),
            Ok(_) => true,
            Err(_) => false,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, args.content.as_bytes()).await?;

        let action = if existed { "overwritten" } else { "created" };
        debug!(path = %path.display(), bytes = args.content.len(), action, "Wrote file");
        Ok(ToolResult::success(format!(
            "File {} successfully ({} bytes written)",
            action,
            args.content.len()
        )))
    }
}

/// Stage into a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    tokio::fs::write(&staged, bytes).await?;
    if let Err(e) = tokio::fs::rename(&staged, path).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }
    Ok(())
}
