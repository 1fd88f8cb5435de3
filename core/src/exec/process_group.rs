//! Signalling a spawned command together with everything it forked.

use std::io;

/// A spawned command and its descendants.
pub trait ProcessGroup: Send + Sync {
  /// Ask the whole group to exit.
  fn terminate(&self) -> io::Result<()>;

  /// Force the whole group down.
  fn kill(&self) -> io::Result<()>;
}

/// POSIX process group led by the spawned shell (`setpgid(0, 0)` at spawn).
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub struct PosixProcessGroup {
  pgid: libc::pid_t,
}

#[cfg(unix)]
impl PosixProcessGroup {
  pub fn new(pgid: u32) -> Self {
    Self {
      pgid: pgid as libc::pid_t,
    }
  }

  fn signal(&self, signal: libc::c_int) -> io::Result<()> {
    if self.pgid <= 1 {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "refusing to signal process group <= 1",
      ));
    }
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(self.pgid, signal) };
    if rc == 0 {
      return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
      // Group already gone.
      return Ok(());
    }
    Err(err)
  }
}

#[cfg(unix)]
impl ProcessGroup for PosixProcessGroup {
  fn terminate(&self) -> io::Result<()> {
    self.signal(libc::SIGTERM)
  }

  fn kill(&self) -> io::Result<()> {
    self.signal(libc::SIGKILL)
  }
}

/// Walks the process tree rooted at `pid` with `taskkill /T`, for platforms
/// without process groups.
#[cfg(not(unix))]
#[derive(Debug, Clone, Copy)]
pub struct TreeTerminator {
  pid: u32,
}

#[cfg(not(unix))]
impl TreeTerminator {
  pub fn new(pid: u32) -> Self {
    Self { pid }
  }

  fn taskkill(&self, force: bool) -> io::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.arg("/T");
    if force {
      cmd.arg("/F");
    }
    cmd
      .arg("/PID")
      .arg(self.pid.to_string())
      .stdout(std::process::Stdio::null())
      .stderr(std::process::Stdio::null());
    cmd.status().map(|_| ())
  }
}

#[cfg(not(unix))]
impl ProcessGroup for TreeTerminator {
  fn terminate(&self) -> io::Result<()> {
    self.taskkill(false)
  }

  fn kill(&self) -> io::Result<()> {
    self.taskkill(true)
  }
}

/// Platform group handle for a freshly spawned leader.
pub fn for_leader(pid: u32) -> Box<dyn ProcessGroup> {
  #[cfg(unix)]
  {
    Box::new(PosixProcessGroup::new(pid))
  }
  #[cfg(not(unix))]
  {
    Box::new(TreeTerminator::new(pid))
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;

  #[test]
  fn refuses_init_and_invalid_groups() {
    assert!(PosixProcessGroup::new(1).terminate().is_err());
    assert!(PosixProcessGroup::new(0).kill().is_err());
  }

  #[test]
  fn signalling_a_missing_group_is_not_an_error() {
    let mut child = std::process::Command::new("true")
      .spawn()
      .expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait");
    assert!(PosixProcessGroup::new(pid).kill().is_ok());
  }
}
