//! Child process execution with combined output capture and a deadline.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{RunOutput, RunnerError};

/// Time allowed for output readers to drain after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `command` to completion, interleaving stdout and stderr line by line.
///
/// The child runs in its own process group. If it outlives `timeout` the whole
/// group is killed and the output captured so far is returned inside
/// [`RunnerError::Timeout`]. Group members left behind by a child that exits
/// are killed too, so nothing keeps writing into the tree after the build.
pub(super) async fn run_captured(
  mut command: Command,
  program: &str,
  timeout: Duration,
) -> Result<RunOutput, RunnerError> {
  command
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
    program: program.to_string(),
    source,
  })?;
  let pid = child.id();
  debug!(program, pid = ?pid, "spawned build process");

  let log = Arc::new(Mutex::new(String::new()));
  let mut readers = Vec::new();
  if let Some(stdout) = child.stdout.take() {
    readers.push(tokio::spawn(forward(stdout, Arc::clone(&log))));
  }
  if let Some(stderr) = child.stderr.take() {
    readers.push(tokio::spawn(forward(stderr, Arc::clone(&log))));
  }

  match tokio::time::timeout(timeout, child.wait()).await {
    Ok(status) => {
      let status = status?;
      if let Some(pid) = pid {
        kill_group(pid, program, false);
      }
      for reader in readers {
        // Grandchildren may keep the pipes open after the child exits.
        if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
          warn!(program, "build output still open after exit, truncating");
        }
      }
      debug!(program, exit_code = ?status.code(), "build process exited");
      Ok(RunOutput {
        exit_code: status.code(),
        log: snapshot(&log),
      })
    }
    Err(_) => {
      warn!(program, timeout = %humantime::format_duration(timeout), "build timed out, killing");
      if let Some(pid) = pid {
        kill_group(pid, program, true);
      }
      if let Err(e) = child.kill().await {
        warn!(program, error = %e, "failed to kill timed out build");
      }
      for reader in readers {
        reader.abort();
      }
      Err(RunnerError::Timeout {
        after: timeout,
        log: snapshot(&log),
      })
    }
  }
}

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32, program: &str, timed_out: bool) {
  use rustix::io::Errno;
  use rustix::process::{Pid, Signal, kill_process_group};

  let Some(group) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
    return;
  };
  match kill_process_group(group, Signal::KILL) {
    Ok(()) if !timed_out => debug!(program, pgid = pid, "killed processes left by build"),
    Ok(()) => {}
    Err(Errno::SRCH) => {}
    Err(e) => warn!(program, pgid = pid, error = %e, "failed to kill build process group"),
  }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32, _program: &str, _timed_out: bool) {}

async fn forward<R: AsyncRead + Unpin>(reader: R, log: Arc<Mutex<String>>) {
  let mut reader = BufReader::new(reader);
  let mut line = Vec::new();
  loop {
    line.clear();
    match reader.read_until(b'\n', &mut line).await {
      Ok(0) | Err(_) => break,
      Ok(_) => {
        let text = String::from_utf8_lossy(&line);
        if let Ok(mut log) = log.lock() {
          log.push_str(&text);
          if !text.ends_with('\n') {
            log.push('\n');
          }
        }
      }
    }
  }
}

fn snapshot(log: &Mutex<String>) -> String {
  log.lock().map(|l| l.clone()).unwrap_or_default()
}
