//! Sandbox path resolution.
//!
//! Every tool-supplied path goes through [`SandboxContext::resolve_for_tool`].
//! Screening and resolution are lexical: nothing here touches the filesystem,
//! so a symlink or encoding trick cannot turn an accepted spelling into an
//! escape after the fact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use atelier_absolute_path::normalize_lexically;
use atelier_cancel::CancelToken;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
  #[error("path is empty")]
  Empty,
  #[error("path contains control characters")]
  InvalidCharacter,
  #[error("path traversal is not allowed: {0}")]
  Traversal(String),
  #[error("home directory references are not allowed: {0}")]
  HomeReference(String),
  #[error("path {path} is outside the sandbox root {root}")]
  OutsideRoot { path: String, root: String },
  #[error("access to {path} is denied by pattern {pattern}")]
  Denied { path: String, pattern: String },
  #[error("invalid deny pattern {pattern}: {message}")]
  InvalidPattern { pattern: String, message: String },
}

impl SandboxError {
  /// Malformed input rather than an escape attempt.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::Empty | Self::InvalidCharacter | Self::InvalidPattern { .. }
    )
  }
}

/// Resolve `path` against `root`.
///
/// Relative inputs are joined onto the root; absolute inputs are normalized and
/// must sit under the root. Any `..` segment is rejected before resolution,
/// even when the result would have stayed inside.
pub fn resolve(path: &str, root: &Path) -> Result<PathBuf, SandboxError> {
  screen(path)?;

  let candidate = Path::new(path);
  if candidate.is_absolute() {
    let normalized = normalize_lexically(candidate);
    if !normalized.starts_with(root) {
      return Err(SandboxError::OutsideRoot {
        path: path.to_string(),
        root: root.display().to_string(),
      });
    }
    return Ok(normalized);
  }

  Ok(normalize_lexically(root.join(candidate)))
}

fn screen(path: &str) -> Result<(), SandboxError> {
  if path.trim().is_empty() {
    return Err(SandboxError::Empty);
  }
  if path.chars().any(char::is_control) {
    return Err(SandboxError::InvalidCharacter);
  }
  if path.starts_with('~') {
    return Err(SandboxError::HomeReference(path.to_string()));
  }
  if has_parent_segment(path) || has_parent_segment(&decode_separators(path)) {
    return Err(SandboxError::Traversal(path.to_string()));
  }
  Ok(())
}

fn has_parent_segment(path: &str) -> bool {
  path.split(['/', '\\']).any(|segment| segment == "..")
}

/// Percent-decodes only dots and separators, which is all a traversal needs.
fn decode_separators(path: &str) -> String {
  let lower = path.to_ascii_lowercase();
  lower
    .replace("%2e", ".")
    .replace("%2f", "/")
    .replace("%5c", "\\")
}

/// Root-relative glob patterns that no tool may read or write.
#[derive(Debug, Clone)]
pub struct PathPolicy {
  patterns: Vec<String>,
  set: GlobSet,
}

impl PathPolicy {
  pub fn new(patterns: &[String]) -> Result<Self, SandboxError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
      let glob = GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .map_err(|e| SandboxError::InvalidPattern {
          pattern: pattern.clone(),
          message: e.to_string(),
        })?;
      builder.add(glob);
    }
    let set = builder.build().map_err(|e| SandboxError::InvalidPattern {
      pattern: patterns.join(","),
      message: e.to_string(),
    })?;
    Ok(Self {
      patterns: patterns.to_vec(),
      set,
    })
  }

  pub fn empty() -> Self {
    Self {
      patterns: Vec::new(),
      set: GlobSet::empty(),
    }
  }

  /// First pattern matching a root-relative, `/`-separated path.
  pub fn denied_by(&self, relative: &str) -> Option<&str> {
    self
      .set
      .matches(relative)
      .first()
      .map(|idx| self.patterns[*idx].as_str())
  }
}

impl Default for PathPolicy {
  fn default() -> Self {
    let defaults: Vec<String> = atelier_config::DEFAULT_DENY_PATTERNS
      .iter()
      .map(|p| p.to_string())
      .collect();
    Self::new(&defaults).unwrap_or_else(|_| Self::empty())
  }
}

/// Per-query context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct SandboxContext {
  pub root: PathBuf,
  pub session_id: String,
  pub cancel: CancelToken,
  policy: Arc<PathPolicy>,
}

impl SandboxContext {
  /// `root` must already be absolute; hosts prepare it with
  /// [`atelier_absolute_path::prepare_root`].
  pub fn new(root: PathBuf, session_id: impl Into<String>, cancel: CancelToken) -> Self {
    Self {
      root,
      session_id: session_id.into(),
      cancel,
      policy: Arc::new(PathPolicy::default()),
    }
  }

  pub fn with_policy(mut self, policy: Arc<PathPolicy>) -> Self {
    self.policy = policy;
    self
  }

  pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
    resolve(path, &self.root)
  }

  /// Resolve a path for a filesystem tool and apply the deny patterns.
  pub fn resolve_for_tool(&self, path: &str) -> Result<PathBuf, SandboxError> {
    let resolved = self.resolve(path)?;
    self.check_allowed(&resolved)?;
    Ok(resolved)
  }

  pub fn check_allowed(&self, resolved: &Path) -> Result<(), SandboxError> {
    let relative = self.relative(resolved);
    if let Some(pattern) = self.policy.denied_by(&relative) {
      warn!(
        session_id = %self.session_id,
        path = %relative,
        pattern,
        "sandbox deny pattern matched"
      );
      return Err(SandboxError::Denied {
        path: relative,
        pattern: pattern.to_string(),
      });
    }
    Ok(())
  }

  pub fn is_denied(&self, resolved: &Path) -> bool {
    self.policy.denied_by(&self.relative(resolved)).is_some()
  }

  /// Root-relative display form with `/` separators; `.` for the root itself.
  pub fn relative(&self, resolved: &Path) -> String {
    let relative = resolved.strip_prefix(&self.root).unwrap_or(resolved);
    let rendered = relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    if rendered.is_empty() {
      ".".to_string()
    } else {
      rendered
    }
  }
}
