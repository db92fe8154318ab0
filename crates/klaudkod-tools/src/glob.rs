use crate::sandbox::{parse_args, relative_display, resolve_path};
use klaudkod_core::error::AgentError;
use klaudkod_core::tool_registry::{Tool, ToolContext};
use klaudkod_core::types::ToolResult;

use async_trait::async_trait;
use ::glob::Pattern;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

const MAX_RESULTS: usize = 1000;

/// A `/`-separated glob where a `**` segment spans any number of
/// directories and every other segment matches exactly one path component.
#[derive(Debug, Clone)]
pub(crate) struct GlobMatcher {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Component(Pattern),
}

impl GlobMatcher {
    pub(crate) fn new(pattern: &str) -> Result<Self, AgentError> {
        let segments = pattern
            .split('/')
            .map(|part| {
                if part == "**" {
                    Ok(Segment::AnyDepth)
                } else {
                    Pattern::new(part)
                        .map(Segment::Component)
                        .map_err(|e| AgentError::BadPattern(format!("{}: {}", pattern, e)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Match a `/`-separated relative path.
    pub(crate) fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(segments: &[Segment], parts: &[&str]) -> bool {
    match (segments.first(), parts.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(_), None) => segments.iter().all(|s| matches!(s, Segment::AnyDepth)),
        (Some(Segment::AnyDepth), Some(_)) => {
            match_segments(&segments[1..], parts) || match_segments(segments, &parts[1..])
        }
        (Some(Segment::Component(pattern)), Some(part)) => {
            pattern.matches(part) && match_segments(&segments[1..], &parts[1..])
        }
    }
}

pub struct GlobTool {
    working_dir: PathBuf,
}

impl GlobTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Supports ** for recursive matching \
         (e.g., '**/*.go', 'src/**/*.ts')"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match files (e.g., '**/*.go', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (defaults to working directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
            #[serde(default)]
            path: Option<String>,
        }
        let args: Args = parse_args(args)?;

        let matcher = GlobMatcher::new(&args.pattern)?;
        let search_root = resolve_path(&self.working_dir, args.path.as_deref().unwrap_or(""))?;
        match tokio::fs::metadata(&search_root).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                return Err(AgentError::tool(
                    "glob",
                    format!("path is not a directory: {}", search_root.display()),
                ))
            }
            Err(_) => return Err(AgentError::NotFound(search_root)),
        }

        debug!(pattern = %args.pattern, root = %search_root.display(), "Globbing");
        let cancel = ctx.cancel.clone();
        let walk_root = search_root.clone();
        let mut matches = tokio::task::spawn_blocking(move || collect_matches(&walk_root, &matcher, &cancel))
            .await
            .map_err(|e| AgentError::tool("glob", e.to_string()))??;
        matches.sort();

        let total = matches.len();
        let mut out = String::from("<glob_results>\n");
        for path in matches.iter().take(MAX_RESULTS) {
            out.push_str(&relative_display(&self.working_dir, path));
            out.push('\n');
        }
        out.push_str(&format!("\nFound {} matches", total));
        if total > MAX_RESULTS {
            out.push_str(&format!(" (showing first {} results)", MAX_RESULTS));
        }
        out.push_str("\n</glob_results>");

        Ok(ToolResult::success(out))
    }
}

fn collect_matches(
    root: &Path,
    matcher: &GlobMatcher,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, AgentError> {
    let mut matches = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_display(root, entry.path());
        if matcher.matches(&rel) {
            matches.push(entry.into_path());
        }
    }
    Ok(matches)
}
