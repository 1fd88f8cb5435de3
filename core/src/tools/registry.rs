use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::ToolDefinition;
use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::spec::ToolSpec;

/// A single tool. Failures are returned, never raised; the router turns the
/// result into a [`crate::tools::context::ToolResult`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
  fn is_mutating(&self) -> bool {
    false
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
  handlers: HashMap<String, Arc<dyn ToolHandler>>,
  specs: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a tool the model can see, replacing any tool of the same name.
  pub fn register_tool(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
    self.handlers.insert(spec.name.clone(), handler);
    self.specs.insert(spec.name.clone(), spec);
  }

  pub fn get_handler(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
    self.handlers.get(name)
  }

  /// Specs sorted by name.
  pub fn list_specs(&self) -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = self.specs.values().cloned().collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
  }

  pub fn model_tools(&self) -> Vec<ToolDefinition> {
    self
      .list_specs()
      .iter()
      .map(ToolSpec::to_definition)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::tools::spec::JsonSchema;

  struct Noop;

  #[async_trait]
  impl ToolHandler for Noop {
    async fn handle(&self, _: &ToolInvocation, _: &SandboxContext) -> Result<Value, ToolError> {
      Ok(json!({}))
    }
  }

  fn spec(name: &str, description: &str) -> ToolSpec {
    ToolSpec::new(
      name,
      description,
      JsonSchema::Object {
        properties: BTreeMap::new(),
        required: None,
        additional_properties: None,
        description: None,
      },
    )
  }

  #[test]
  fn registered_tools_are_offered_sorted() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(spec("write", "w"), Arc::new(Noop));
    registry.register_tool(spec("read", "r"), Arc::new(Noop));

    assert!(registry.get_handler("read").is_some());
    let names: Vec<String> = registry.model_tools().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["read", "write"]);
  }

  #[test]
  fn registering_a_name_twice_replaces_the_tool() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(spec("read", "old"), Arc::new(Noop));
    registry.register_tool(spec("read", "new"), Arc::new(Noop));

    let tools = registry.model_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].description, "new");
  }
}
