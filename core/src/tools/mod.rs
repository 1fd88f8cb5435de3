pub mod context;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod spec;

use std::sync::Arc;

use atelier_config::Config;
use tracing::warn;

use crate::exec::{ExecEngine, ExecError};
use crate::tools::registry::ToolRegistry;
use crate::tools::router::ToolRouter;
use crate::tools::spec::build_specs;

/// Build the built-in tool registry and its router from configuration.
pub fn build_default_tools(
  config: &Config,
) -> Result<(Arc<ToolRegistry>, Arc<ToolRouter>), ExecError> {
  let engine = Arc::new(ExecEngine::from_config(&config.shell)?);
  let mut handlers = handlers::builtin_handlers(config, engine);

  let mut registry = ToolRegistry::new();
  for spec in build_specs() {
    match handlers.remove(spec.name.as_str()) {
      Some(handler) => registry.register_tool(spec, handler),
      None => warn!(tool = %spec.name, "no handler for tool spec"),
    }
  }

  let registry = Arc::new(registry);
  let router = Arc::new(ToolRouter::new(registry.clone()));

  Ok((registry, router))
}
