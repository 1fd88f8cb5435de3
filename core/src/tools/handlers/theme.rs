//! Design theme authoring: writes a theme as CSS custom properties that the
//! canvas host picks up.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct ThemeHandler {
  theme_dir: String,
}

impl ThemeHandler {
  pub fn new(theme_dir: impl Into<String>) -> Self {
    Self {
      theme_dir: theme_dir.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ThemeMode {
  Light,
  Dark,
}

impl ThemeMode {
  fn as_str(self) -> &'static str {
    match self {
      Self::Light => "light",
      Self::Dark => "dark",
    }
  }
}

#[derive(Debug, Deserialize)]
struct ThemeArgs {
  name: String,
  colors: BTreeMap<String, String>,
  #[serde(default)]
  fonts: BTreeMap<String, String>,
  radius: Option<String>,
  mode: Option<ThemeMode>,
}

fn valid_name(name: &str) -> bool {
  (1..=64).contains(&name.len())
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn valid_token(token: &str) -> bool {
  !token.is_empty()
    && !token.starts_with('-')
    && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn valid_hex_color(value: &str) -> bool {
  let Some(hex) = value.strip_prefix('#') else {
    return false;
  };
  matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn valid_font_stack(value: &str) -> bool {
  !value.trim().is_empty()
    && !value
      .chars()
      .any(|c| matches!(c, ';' | '{' | '}' | '<' | '>' | '\\') || c.is_control())
}

fn valid_length(value: &str) -> bool {
  let number_end = value
    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
    .unwrap_or(value.len());
  let (number, unit) = value.split_at(number_end);
  !number.is_empty()
    && number.parse::<f64>().is_ok()
    && matches!(unit, "px" | "rem" | "em" | "%")
}

fn render(args: &ThemeArgs) -> Result<(String, Vec<String>), ToolError> {
  if args.colors.is_empty() {
    return Err(ToolError::validation("colors must define at least one token"));
  }

  let mut variables = Vec::new();
  for (token, value) in &args.colors {
    if !valid_token(token) {
      return Err(ToolError::validation(format!("invalid color token name: {token}")));
    }
    if !valid_hex_color(value) {
      return Err(ToolError::validation(format!(
        "color {token} must be #rgb, #rrggbb or #rrggbbaa, got {value}"
      )));
    }
    variables.push((format!("--color-{}", token.to_ascii_lowercase()), value.to_ascii_lowercase()));
  }
  for (token, value) in &args.fonts {
    if !valid_token(token) {
      return Err(ToolError::validation(format!("invalid font token name: {token}")));
    }
    if !valid_font_stack(value) {
      return Err(ToolError::validation(format!("invalid font stack for {token}")));
    }
    variables.push((format!("--font-{}", token.to_ascii_lowercase()), value.trim().to_string()));
  }
  if let Some(radius) = &args.radius {
    if !valid_length(radius) {
      return Err(ToolError::validation(format!(
        "radius must be a length in px, rem, em or %, got {radius}"
      )));
    }
    variables.push(("--radius".to_string(), radius.clone()));
  }

  let selector = match args.mode {
    Some(_) => format!("[data-theme=\"{}\"]", args.name),
    None => ":root".to_string(),
  };

  let mut css = String::new();
  let _ = writeln!(css, "/* theme: {} */", args.name);
  let _ = writeln!(css, "{selector} {{");
  if let Some(mode) = args.mode {
    let _ = writeln!(css, "  color-scheme: {};", mode.as_str());
  }
  for (name, value) in &variables {
    let _ = writeln!(css, "  {name}: {value};");
  }
  css.push_str("}\n");

  Ok((css, variables.into_iter().map(|(name, _)| name).collect()))
}

#[async_trait]
impl ToolHandler for ThemeHandler {
  fn is_mutating(&self) -> bool {
    true
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: ThemeArgs = invocation.parse_arguments()?;
    if !valid_name(&args.name) {
      return Err(ToolError::validation(
        "theme name must be 1-64 letters, digits, '-' or '_'",
      ));
    }
    let (css, variables) = render(&args)?;

    let path = ctx.resolve_for_tool(&format!("{}/{}.css", self.theme_dir, args.name))?;
    let rel = ctx.relative(&path);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ToolError::io("create theme directory for", &rel, &e))?;
    }
    tokio::fs::write(&path, css.as_bytes())
      .await
      .map_err(|e| ToolError::io("write", &rel, &e))?;

    Ok(json!({
      "path": rel,
      "variables": variables,
    }))
  }
}
