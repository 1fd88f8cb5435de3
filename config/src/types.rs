// Configuration Types
// All configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Sandbox root and path policy
  pub sandbox: SandboxConfig,
  /// Shell execution engine settings
  pub shell: ShellConfig,
  /// Filesystem tool limits
  pub tools: ToolsConfig,
  /// Model configuration
  pub models: ModelsConfig,
}

// ============================================================================
// SANDBOX CONFIGURATION
// ============================================================================

/// Default deny patterns for sensitive files inside the sandbox root.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
  "**/.git",
  "**/.git/**",
  "**/.ssh/**",
  "**/.gnupg/**",
  "**/.aws/**",
  "**/.env",
  "**/.env.*",
  "**/.netrc",
  "**/.npmrc",
  "**/id_rsa*",
  "**/id_ed25519*",
  "**/*.pem",
  "**/*.key",
  "**/*.p12",
];

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
  /// Workspace root; the current directory when unset
  #[serde(skip_serializing_if = "Option::is_none")]
  pub root: Option<PathBuf>,
  /// Glob patterns (root-relative) no tool may touch
  pub deny_patterns: Vec<String>,
}

impl Default for SandboxConfig {
  fn default() -> Self {
    Self {
      root: None,
      deny_patterns: DEFAULT_DENY_PATTERNS.iter().map(|p| p.to_string()).collect(),
    }
  }
}

// ============================================================================
// SHELL CONFIGURATION
// ============================================================================

/// Shell execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
  /// Timeout applied when a call does not pass `timeoutMs`
  pub default_timeout_ms: u64,
  /// Upper bound for a caller-supplied timeout
  pub max_timeout_ms: u64,
  /// Window between the graceful and the forceful signal
  pub grace_period_ms: u64,
  /// Per-stream capture cap
  pub max_output_bytes: usize,
  /// Shell binary; bash on PATH, else /bin/sh
  #[serde(skip_serializing_if = "Option::is_none")]
  pub binary: Option<PathBuf>,
  /// Additional deny-list regexes
  pub extra_deny_patterns: Vec<String>,
  /// Route the stdout of uncaptured commands to our stderr
  pub uncaptured_stdout_to_stderr: bool,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      default_timeout_ms: 30_000,
      max_timeout_ms: 600_000,
      grace_period_ms: 1_000,
      max_output_bytes: 1024 * 1024,
      binary: None,
      extra_deny_patterns: Vec::new(),
      uncaptured_stdout_to_stderr: false,
    }
  }
}

// ============================================================================
// TOOLS CONFIGURATION
// ============================================================================

/// Filesystem tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
  /// Largest file the read tool will load
  pub max_read_bytes: u64,
  /// Cap on glob and grep results
  pub max_search_results: usize,
  /// Directory (root-relative) the theme tool writes into
  pub theme_dir: String,
}

impl Default for ToolsConfig {
  fn default() -> Self {
    Self {
      max_read_bytes: 2 * 1024 * 1024,
      max_search_results: 500,
      theme_dir: "themes".to_string(),
    }
  }
}

// ============================================================================
// MODELS CONFIGURATION
// ============================================================================

/// Models configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
  /// Model provider
  pub provider: String,
  /// Model name
  pub model: String,
  /// Base URL for API
  #[serde(skip_serializing_if = "Option::is_none")]
  pub base_url: Option<String>,
  /// Environment variable holding the API key
  pub api_key_env: String,
  /// System prompt sent ahead of the conversation
  #[serde(skip_serializing_if = "Option::is_none")]
  pub system_prompt: Option<String>,
  /// Model streams opened per query before giving up
  pub max_steps: usize,
}

impl Default for ModelsConfig {
  fn default() -> Self {
    Self {
      provider: "openai".to_string(),
      model: "gpt-4o".to_string(),
      base_url: None,
      api_key_env: "OPENAI_API_KEY".to_string(),
      system_prompt: None,
      max_steps: 10,
    }
  }
}
