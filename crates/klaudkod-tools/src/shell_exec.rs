use crate::sandbox::{parse_args, resolve_path};
use klaudkod_core::error::AgentError;
use klaudkod_core::tool_registry::{Tool, ToolContext};
use klaudkod_core::types::ToolResult;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MAX_OUTPUT_CHARS: usize = 30_000;
/// How long to keep draining pipes after the shell itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Run shell commands with `sh -c` inside the working directory.
pub struct BashTool {
    working_dir: PathBuf,
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(working_dir: impl Into<PathBuf>, default_timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.into(),
            default_timeout,
        }
    }
}

enum Exit {
    Finished(std::process::ExitStatus),
    TimedOut,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute shell commands with optional timeout and working directory. Supports running \
         any shell command with configurable timeout (default 2 minutes) and custom working \
         directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Optional timeout in milliseconds"
                },
                "workdir": {
                    "type": "string",
                    "description": format!(
                        "The working directory to run the command in. Defaults to {}. \
                         Use this instead of 'cd' commands.",
                        self.working_dir.display()
                    )
                },
                "description": {
                    "type": "string",
                    "description": "Clear, concise description of what this command does in 5-10 words. \
                                    Examples:\nInput: ls\nOutput: Lists files in current directory\n\n\
                                    Input: git status\nOutput: Shows working tree status\n\n\
                                    Input: npm install\nOutput: Installs package dependencies"
                }
            },
            "required": ["command", "description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            command: String,
            description: String,
            #[serde(default)]
            timeout: Option<f64>,
            #[serde(default)]
            workdir: Option<String>,
        }
        let args: Args = parse_args(args)?;

        let timeout = match args.timeout {
            Some(ms) if ms > 0.0 => Duration::from_millis(ms as u64),
            _ => self.default_timeout,
        };
        let cwd = resolve_path(&self.working_dir, args.workdir.as_deref().unwrap_or(""))?;
        if !cwd.is_dir() {
            return Err(AgentError::tool(
                "bash",
                format!("workdir is not a directory: {}", cwd.display()),
            ));
        }

        debug!(
            session_id = %ctx.session_id,
            command = %args.command,
            description = %args.description,
            timeout_ms = timeout.as_millis() as u64,
            "Running shell command"
        );

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return Ok(ToolResult::error(format!("Command failed: {}\n\n", e))),
        };

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(drain(pipe, stdout.clone()));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(drain(pipe, stderr.clone()));
        }

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status?),
            _ = tokio::time::sleep(timeout) => {
                warn!(session_id = %ctx.session_id, "Shell command timed out, killing");
                let _ = child.kill().await;
                Exit::TimedOut
            }
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AgentError::Cancelled);
            }
        };

        // Background children may still hold the pipes open.
        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
                abort.abort();
            }
        }

        let stdout = take_text(&stdout);
        let stderr = take_text(&stderr);
        Ok(format_result(stdout, stderr, exit, timeout))
    }
}

fn drain<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut out) => out.extend_from_slice(&buf[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&buf[..n]),
                },
            }
        }
    })
}

fn take_text(sink: &Mutex<Vec<u8>>) -> String {
    let bytes = match sink.lock() {
        Ok(mut out) => std::mem::take(&mut *out),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

fn format_result(stdout: String, stderr: String, exit: Exit, timeout: Duration) -> ToolResult {
    let mut output = stdout;
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str("[stderr]\n");
        output.push_str(&stderr);
    }

    let mut notes = Vec::new();
    if let Some((cut, _)) = output.char_indices().nth(MAX_OUTPUT_CHARS) {
        output.truncate(cut);
        notes.push(format!(
            "bash tool truncated output as it exceeded {} char limit",
            MAX_OUTPUT_CHARS
        ));
    }
    let timeout_ms = timeout.as_millis();
    if matches!(exit, Exit::TimedOut) {
        notes.push(format!(
            "bash tool terminated command after exceeding timeout {} ms",
            timeout_ms
        ));
    }
    if !notes.is_empty() {
        output.push_str("\n\n<bash_metadata>\n");
        output.push_str(&notes.join("\n"));
        output.push_str("\n</bash_metadata>");
    }

    match exit {
        Exit::Finished(status) if status.success() => ToolResult::success(output),
        Exit::Finished(status) => ToolResult::error(format!("Command failed: {}\n\n{}", status, output)),
        Exit::TimedOut => ToolResult::error(format!(
            "Command failed: timed out after {} ms\n\n{}",
            timeout_ms, output
        )),
    }
}
