// Utils - Absolute Path
// Absolute path utilities

use std::path::{Component, Path, PathBuf};

use anyhow::Context;

/// Canonicalize an existing path.
pub fn absolute_path(path: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
  let path = path.as_ref();
  std::fs::canonicalize(path)
    .with_context(|| format!("failed to get absolute path of {}", path.display()))
}

/// Create `root` if it is missing and return its canonical form.
pub fn prepare_root(root: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
  let root = root.as_ref();
  if !root.exists() {
    std::fs::create_dir_all(root)
      .with_context(|| format!("failed to create sandbox root {}", root.display()))?;
  }
  let root = absolute_path(root)?;
  if !root.is_dir() {
    anyhow::bail!("sandbox root {} is not a directory", root.display());
  }
  Ok(root)
}

/// Remove `.` components and fold `..` without touching the filesystem.
///
/// `..` at the root of an absolute path stays at the root; a leading `..`
/// in a relative path is kept.
pub fn normalize_lexically(path: impl AsRef<Path>) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.as_ref().components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
        if popped {
          out.pop();
        } else if !out.has_root() {
          out.push("..");
        }
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}
