pub mod file_ops;
pub mod glob;
pub mod grep;
pub mod sandbox;
pub mod shell_exec;

use klaudkod_core::config::AppConfig;
use klaudkod_core::tool_registry::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use self::file_ops::{ReadTool, WriteTool};
pub use self::glob::GlobTool;
pub use self::grep::GrepTool;
pub use self::shell_exec::BashTool;

/// Register all built-in tools into the registry, confined to its working
/// directory.
pub fn register_all(registry: &mut ToolRegistry, config: &AppConfig) {
    let root = registry.working_dir().to_path_buf();
    let command_timeout = Duration::from_secs(config.tools.command_timeout_secs);

    registry.register(Arc::new(ReadTool::new(&root)));
    registry.register(Arc::new(WriteTool::new(&root)));
    registry.register(Arc::new(GlobTool::new(&root)));
    registry.register(Arc::new(GrepTool::new(&root)));
    registry.register(Arc::new(BashTool::new(root, command_timeout)));
}
