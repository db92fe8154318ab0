//! Path confinement and file-type policy shared by the built-in tools.

use klaudkod_core::error::AgentError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

/// Example/template files that look like credentials but are safe to show.
const CREDENTIAL_WHITELIST: &[&str] = &[".env.sample", ".env.example", ".env.template", ".example"];

const BINARY_EXTENSIONS: &[&str] = &[
    "zip", "tar", "gz", "exe", "dll", "so", "class", "jar", "war", "7z", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx", "odt", "ods", "odp", "bin", "dat", "obj", "o", "a", "lib", "wasm",
    "pyc", "pyo",
];

/// Decode a tool's JSON arguments into its typed argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| AgentError::BadArguments(e.to_string()))
}

/// Resolve a tool-supplied path against the working-directory root and
/// reject anything that lands outside it.
///
/// `root` must already be canonical. Relative paths are joined to the root,
/// `.`/`..` are folded lexically, then the longest existing ancestor is
/// canonicalized (following symlinks) and the non-existent tail re-appended.
/// An empty path means the root itself.
pub fn resolve_path(root: &Path, raw: &str) -> Result<PathBuf, AgentError> {
    if raw.trim().is_empty() {
        return Ok(root.to_path_buf());
    }

    let joined = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        root.join(raw)
    };
    let cleaned = clean(&joined);

    if !cleaned.starts_with(root) {
        return Err(AgentError::PathEscape(cleaned));
    }

    let canonical = canonicalize_existing_prefix(&cleaned)?;
    if !canonical.starts_with(root) {
        return Err(AgentError::PathEscape(cleaned));
    }

    Ok(canonical)
}

/// Lexically normalize a path: drop `.` and let `..` pop a component.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, AgentError> {
    let mut existing = path;
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut canonical = existing.canonicalize()?;
    for component in tail.into_iter().rev() {
        canonical.push(component);
    }
    Ok(canonical)
}

/// Whether a file name looks like a dotenv credential file.
///
/// Blocks `.env`, `.env.<anything>` and `<anything>.env`, case-insensitively,
/// unless the name ends with a whitelisted example/template suffix.
pub fn is_credential_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();

    if CREDENTIAL_WHITELIST.iter().any(|w| lower.ends_with(w)) {
        return false;
    }

    let dotenv_prefixed = lower.starts_with(".env") && (lower.len() == 4 || lower.as_bytes()[4] == b'.');
    dotenv_prefixed || lower.ends_with(".env")
}

pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Display a path relative to the working directory.
pub fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
