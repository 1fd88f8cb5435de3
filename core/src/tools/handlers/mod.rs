pub mod edit;
pub mod glob;
pub mod grep_files;
pub mod list_dir;
pub mod multiedit;
pub mod read_file;
pub mod shell;
pub mod theme;
pub mod write_file;

use std::collections::HashMap;
use std::sync::Arc;

use atelier_config::Config;

use crate::exec::ExecEngine;
use crate::tools::registry::ToolHandler;

/// Built-in handlers keyed by tool name.
pub fn builtin_handlers(
  config: &Config,
  engine: Arc<ExecEngine>,
) -> HashMap<&'static str, Arc<dyn ToolHandler>> {
  let tools = &config.tools;
  let mut handlers: HashMap<&'static str, Arc<dyn ToolHandler>> = HashMap::new();
  handlers.insert("read", Arc::new(read_file::ReadFileHandler::new(tools.max_read_bytes)));
  handlers.insert("write", Arc::new(write_file::WriteFileHandler));
  handlers.insert("edit", Arc::new(edit::EditHandler));
  handlers.insert("multiedit", Arc::new(multiedit::MultiEditHandler));
  handlers.insert("glob", Arc::new(glob::GlobHandler::new(tools.max_search_results)));
  handlers.insert(
    "grep",
    Arc::new(grep_files::GrepFilesHandler::new(tools.max_search_results)),
  );
  handlers.insert("ls", Arc::new(list_dir::ListDirHandler));
  handlers.insert("theme", Arc::new(theme::ThemeHandler::new(tools.theme_dir.clone())));
  handlers.insert(
    "bash",
    Arc::new(shell::ShellHandler::new(
      engine,
      config.shell.default_timeout_ms,
      config.shell.max_timeout_ms,
    )),
  );
  handlers
}
