use crate::glob::GlobMatcher;
use crate::sandbox::{parse_args, relative_display, resolve_path};
use klaudkod_core::error::AgentError;
use klaudkod_core::tool_registry::{Tool, ToolContext};
use klaudkod_core::types::ToolResult;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

const MAX_RESULTS: usize = 100;
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "vendor", "__pycache__", ".venv"];
const BINARY_SNIFF_LEN: usize = 512;

pub struct GrepTool {
    working_dir: PathBuf,
}

impl GrepTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Search {
    lines: Vec<String>,
    total: usize,
    files_searched: usize,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for regex patterns in file contents. Supports file inclusion patterns \
         and line-by-line matching"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search in (defaults to working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern for files to include (e.g. '*.go')"
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
            #[serde(default)]
            include: Option<String>,
        }
        let args: Args = parse_args(args)?;

        let regex = Regex::new(&args.pattern)
            .map_err(|e| AgentError::BadPattern(format!("invalid regex: {}", e)))?;
        let include = args
            .include
            .as_deref()
            .filter(|i| !i.is_empty())
            .map(GlobMatcher::new)
            .transpose()?;

        let search_root = resolve_path(&self.working_dir, args.path.as_deref().unwrap_or(""))?;
        if !search_root.exists() {
            return Err(AgentError::NotFound(search_root));
        }

        debug!(pattern = %args.pattern, root = %search_root.display(), "Grepping");
        let cancel = ctx.cancel.clone();
        let working_dir = self.working_dir.clone();
        let search = tokio::task::spawn_blocking(move || {
            search_tree(&working_dir, &search_root, &regex, include.as_ref(), &cancel)
        })
        .await
        .map_err(|e| AgentError::tool("grep", e.to_string()))??;

        let mut out = String::from("<grep_results>\n");
        for line in &search.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&format!(
            "\nFound {} matches in {} files",
            search.total, search.files_searched
        ));
        if search.total > MAX_RESULTS {
            out.push_str(&format!(" (showing first {} results)", MAX_RESULTS));
        }
        out.push_str("\n</grep_results>");

        Ok(ToolResult::success(out))
    }
}

fn search_tree(
    working_dir: &Path,
    root: &Path,
    regex: &Regex,
    include: Option<&GlobMatcher>,
    cancel: &CancellationToken,
) -> Result<Search, AgentError> {
    let mut search = Search::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(include) = include {
            if !include.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }
        }
        let rel = relative_display(working_dir, entry.path());
        if search_file(entry.path(), &rel, regex, &mut search) {
            search.files_searched += 1;
        }
    }

    Ok(search)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && SKIP_DIRS.iter().any(|d| *d == name)
}

/// Scan one file line by line. Returns `false` for unreadable or binary
/// files (a NUL byte in the first 512 bytes), which are not counted.
fn search_file(path: &Path, rel: &str, regex: &Regex, search: &mut Search) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else { return false };
    let mut head = Vec::with_capacity(BINARY_SNIFF_LEN);
    if (&mut file).take(BINARY_SNIFF_LEN as u64).read_to_end(&mut head).is_err() {
        return false;
    }
    if head.contains(&0) {
        return false;
    }

    let mut reader = BufReader::new(head.as_slice().chain(file));
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(path = %path.display(), "Stopped reading: {}", e);
                break;
            }
        }
        line_no += 1;

        let decoded = String::from_utf8_lossy(&buf);
        let line: &str = &decoded;
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if regex.is_match(line) {
            search.total += 1;
            if search.lines.len() < MAX_RESULTS {
                search.lines.push(format!("{}:{}:{}", rel, line_no, line));
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> ToolContext {
        ToolContext::new("test", CancellationToken::new())
    }

    fn tree() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let files = [
            ("main.go", "package main\n\nfunc main() {\n\tTODO()\n}\n"),
            ("lib/util.go", "package lib\n// TODO: tidy\n"),
            ("lib/notes.md", "TODO list\n"),
            ("node_modules/dep/index.js", "// TODO vendored\n"),
            (".git/HEAD", "TODO ref\n"),
        ];
        for (file, body) in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        std::fs::write(root.join("blob.bin.txt"), b"TODO\0binary").unwrap();
        (tmp, root)
    }

    #[tokio::test]
    async fn test_grep_reports_path_line_and_text() {
        let (_tmp, root) = tree();
        let result = GrepTool::new(&root)
            .execute(&ctx(), json!({"pattern": "TODO", "include": "*.go"}))
            .await
            .unwrap();

        assert!(result.content.starts_with("<grep_results>\n"));
        assert!(result.content.contains("lib/util.go:2:// TODO: tidy\n"));
        assert!(result.content.contains("main.go:4:\tTODO()\n"));
        assert!(!result.content.contains("notes.md"));
        assert!(result.content.ends_with("\nFound 2 matches in 2 files\n</grep_results>"));
    }

    #[tokio::test]
    async fn test_grep_skips_vendor_dirs_and_binaries() {
        let (_tmp, root) = tree();
        let result = GrepTool::new(&root)
            .execute(&ctx(), json!({"pattern": "TODO"}))
            .await
            .unwrap();

        assert!(!result.content.contains("node_modules"));
        assert!(!result.content.contains(".git/"));
        assert!(!result.content.contains("blob.bin.txt"));
        assert!(result.content.contains("Found 3 matches in 3 files"));
    }

    #[tokio::test]
    async fn test_grep_single_file_path() {
        let (_tmp, root) = tree();
        let result = GrepTool::new(&root)
            .execute(&ctx(), json!({"pattern": "^package", "path": "lib/util.go"}))
            .await
            .unwrap();
        assert!(result.content.contains("lib/util.go:1:package lib"));
        assert!(result.content.contains("Found 1 matches in 1 files"));
    }

    #[tokio::test]
    async fn test_grep_caps_listing_but_counts_all() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        std::fs::write(root.join("many.txt"), "hit\n".repeat(150)).unwrap();

        let result = GrepTool::new(&root)
            .execute(&ctx(), json!({"pattern": "hit"}))
            .await
            .unwrap();
        let listed = result.content.lines().filter(|l| l.starts_with("many.txt:")).count();
        assert_eq!(listed, 100);
        assert!(result
            .content
            .contains("Found 150 matches in 1 files (showing first 100 results)"));
    }

    #[tokio::test]
    async fn test_grep_sniffs_only_the_file_head() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();

        let mut latin1 = b"caf\xe9 needle\n".to_vec();
        latin1.extend_from_slice(b"plain line\n");
        std::fs::write(root.join("latin1.txt"), latin1).unwrap();

        let mut late_nul = "x\n".repeat(400).into_bytes();
        late_nul.extend_from_slice(b"\0\nneedle at the end\n");
        std::fs::write(root.join("late_nul.log"), late_nul).unwrap();

        let result = GrepTool::new(&root)
            .execute(&ctx(), json!({"pattern": "needle"}))
            .await
            .unwrap();
        assert!(result.content.contains("latin1.txt:1:caf\u{fffd} needle\n"));
        assert!(result.content.contains("late_nul.log:402:needle at the end\n"));
        assert!(result.content.contains("Found 2 matches in 2 files"));
    }

    #[tokio::test]
    async fn test_grep_errors() {
        let (_tmp, root) = tree();
        let tool = GrepTool::new(&root);

        let bad = tool.execute(&ctx(), json!({"pattern": "("})).await.unwrap_err();
        assert!(matches!(bad, AgentError::BadPattern(_)));

        let escape = tool
            .execute(&ctx(), json!({"pattern": "x", "path": "../"}))
            .await
            .unwrap_err();
        assert!(matches!(escape, AgentError::PathEscape(_)));
    }
}
