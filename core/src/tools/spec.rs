use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ToolDefinition;

/// JSON schema representation for tool input contracts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
  String {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<String>>,
  },
  Integer {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Boolean {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Array {
    items: Box<JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Object {
    properties: BTreeMap<String, JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
    #[serde(
      rename = "additionalProperties",
      skip_serializing_if = "Option::is_none"
    )]
    additional_properties: Option<Box<JsonSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
}

impl JsonSchema {
  pub fn to_value(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
  pub name: String,
  pub description: String,
  pub input_schema: JsonSchema,
}

impl ToolSpec {
  pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: JsonSchema) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      input_schema,
    }
  }

  pub fn to_definition(&self) -> ToolDefinition {
    ToolDefinition {
      name: self.name.clone(),
      description: self.description.clone(),
      parameters: self.input_schema.to_value(),
    }
  }
}

pub fn build_specs() -> Vec<ToolSpec> {
  vec![
    read_tool(),
    write_tool(),
    edit_tool(),
    multiedit_tool(),
    glob_tool(),
    grep_tool(),
    ls_tool(),
    theme_tool(),
    bash_tool(),
  ]
}

fn obj(properties: BTreeMap<String, JsonSchema>, required: &[&str]) -> JsonSchema {
  JsonSchema::Object {
    properties,
    required: if required.is_empty() {
      None
    } else {
      Some(required.iter().map(|s| s.to_string()).collect())
    },
    additional_properties: None,
    description: None,
  }
}

fn str_field(desc: &str) -> JsonSchema {
  JsonSchema::String {
    description: Some(desc.to_string()),
    allowed: None,
  }
}

fn int_field(desc: &str) -> JsonSchema {
  JsonSchema::Integer {
    description: Some(desc.to_string()),
  }
}

fn bool_field(desc: &str) -> JsonSchema {
  JsonSchema::Boolean {
    description: Some(desc.to_string()),
  }
}

fn string_map(desc: &str) -> JsonSchema {
  JsonSchema::Object {
    properties: BTreeMap::new(),
    required: None,
    additional_properties: Some(Box::new(JsonSchema::String {
      description: None,
      allowed: None,
    })),
    description: Some(desc.to_string()),
  }
}

fn read_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path, relative to the workspace root."));
  props.insert("offset".to_string(), int_field("Zero-based line to start from."));
  props.insert("limit".to_string(), int_field("Maximum number of lines to return."));
  ToolSpec::new("read", "Read a UTF-8 text file from the workspace.", obj(props, &["path"]))
}

fn write_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path, relative to the workspace root."));
  props.insert("content".to_string(), str_field("Full file content."));
  ToolSpec::new(
    "write",
    "Create or overwrite a file. Parent directories are created as needed.",
    obj(props, &["path", "content"]),
  )
}

fn edit_fields() -> BTreeMap<String, JsonSchema> {
  let mut props = BTreeMap::new();
  props.insert("oldString".to_string(), str_field("Exact text to replace."));
  props.insert("newString".to_string(), str_field("Replacement text."));
  props.insert(
    "replaceAll".to_string(),
    bool_field("Replace every occurrence instead of requiring a unique match."),
  );
  props
}

fn edit_tool() -> ToolSpec {
  let mut props = edit_fields();
  props.insert("path".to_string(), str_field("File to edit."));
  ToolSpec::new(
    "edit",
    "Replace text in an existing file.",
    obj(props, &["path", "oldString", "newString"]),
  )
}

fn multiedit_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File to edit."));
  props.insert(
    "edits".to_string(),
    JsonSchema::Array {
      items: Box::new(obj(edit_fields(), &["oldString", "newString"])),
      description: Some("Edits applied in order; all succeed or none are written.".to_string()),
    },
  );
  ToolSpec::new(
    "multiedit",
    "Apply several replacements to one file atomically.",
    obj(props, &["path", "edits"]),
  )
}

fn glob_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("pattern".to_string(), str_field("Glob pattern such as src/**/*.css."));
  props.insert("path".to_string(), str_field("Directory to search from. Defaults to the root."));
  ToolSpec::new("glob", "Find files by glob pattern.", obj(props, &["pattern"]))
}

fn grep_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("pattern".to_string(), str_field("Regular expression to search for."));
  props.insert("path".to_string(), str_field("File or directory to search. Defaults to the root."));
  props.insert("include".to_string(), str_field("Only search files whose name matches this glob."));
  props.insert("caseInsensitive".to_string(), bool_field("Match without regard to case."));
  ToolSpec::new(
    "grep",
    "Search file contents with a regular expression.",
    obj(props, &["pattern"]),
  )
}

fn ls_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("Directory to list. Defaults to the root."));
  ToolSpec::new("ls", "List a directory.", obj(props, &[]))
}

fn theme_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("name".to_string(), str_field("Theme name; letters, digits, '-' and '_'."));
  props.insert("colors".to_string(), string_map("Color tokens to hex values (#rgb, #rrggbb or #rrggbbaa)."));
  props.insert("fonts".to_string(), string_map("Font tokens to font-family stacks."));
  props.insert("radius".to_string(), str_field("Base corner radius, e.g. 8px."));
  props.insert(
    "mode".to_string(),
    JsonSchema::String {
      description: Some("Scope the theme to a color mode.".to_string()),
      allowed: Some(vec!["light".to_string(), "dark".to_string()]),
    },
  );
  ToolSpec::new(
    "theme",
    "Write a design theme as CSS custom properties.",
    obj(props, &["name", "colors"]),
  )
}

fn bash_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("command".to_string(), str_field("Shell command to run."));
  props.insert("directory".to_string(), str_field("Working directory inside the workspace."));
  props.insert("timeoutMs".to_string(), int_field("Timeout in milliseconds (default 30000)."));
  props.insert("captureOutput".to_string(), bool_field("Capture stdout and stderr (default true)."));
  props.insert("env".to_string(), string_map("Extra environment variables."));
  ToolSpec::new(
    "bash",
    "Run a shell command in the workspace with a timeout.",
    obj(props, &["command"]),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_spec_is_an_object_schema() {
    let specs = build_specs();
    assert_eq!(specs.len(), 9);
    for spec in specs {
      let value = spec.to_definition().parameters;
      assert_eq!(value["type"], "object", "{}", spec.name);
    }
  }

  #[test]
  fn bash_schema_lists_required_command() {
    let value = bash_tool().input_schema.to_value();
    assert_eq!(value["required"], serde_json::json!(["command"]));
    assert_eq!(value["properties"]["env"]["additionalProperties"]["type"], "string");
  }
}
