//! Subprocess invocation with captured output and an enforced wall-clock
//! timeout.
//!
//! Every external binary the core touches (compilers, the agent CLI) goes
//! through [`ToolRunner::run`]. A timed-out process is first asked to stop
//! (SIGTERM on unix), then killed after a short grace period.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::error::ToolError;

/// Result of one tool invocation. A timed-out or signalled process is not an
/// error at this layer; callers decide what a missing exit code means.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, absent when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal number, unix only.
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True when the wall-clock timeout fired and the process was terminated.
    pub timed_out: bool,
}

impl ToolOutput {
    /// True when the process exited on its own with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

#[derive(Debug, Clone)]
pub struct ToolRunner {
    /// Delay between the graceful termination request and the forceful kill.
    grace_period: Duration,
}

impl ToolRunner {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Runs `command args...` in `working_dir`, capturing stdout and stderr
    /// as text, enforcing `timeout` end to end.
    pub async fn run(
        &self,
        command: &str,
        args: &[&str],
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running tool: {} {:?}", command, args);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // Drain both pipes concurrently so a chatty process cannot deadlock
        // on a full pipe buffer while we wait for it.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut timed_out = false;
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(waited) => waited.map_err(|source| ToolError::Wait {
                command: command.to_string(),
                source,
            })?,
            Err(_elapsed) => {
                timed_out = true;
                warn!(
                    "Tool '{}' exceeded {:?} timeout, requesting termination",
                    command, timeout
                );
                self.shutdown(command, &mut child).await?
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ToolOutput {
            exit_code: status.code(),
            signal: exit_signal(&status),
            stdout,
            stderr,
            duration: started.elapsed(),
            timed_out,
        })
    }

    /// Escalating termination: graceful signal, grace period, forceful kill.
    async fn shutdown(
        &self,
        command: &str,
        child: &mut Child,
    ) -> Result<std::process::ExitStatus, ToolError> {
        request_termination(child);

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(waited) => waited.map_err(|source| ToolError::Wait {
                command: command.to_string(),
                source,
            }),
            Err(_still_running) => {
                warn!(
                    "Tool '{}' ignored termination request, killing it",
                    command
                );
                child.kill().await.map_err(|source| ToolError::Wait {
                    command: command.to_string(),
                    source,
                })?;
                child.wait().await.map_err(|source| ToolError::Wait {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Asks the child to stop gracefully. SIGTERM on unix; elsewhere the best we
/// can do is start the kill immediately.
#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    // No graceful signal available; fall through to the forceful kill path.
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = ToolRunner::default();
        let output = runner
            .run(
                "sh",
                &["-c", "echo hello; echo oops >&2"],
                &cwd(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let runner = ToolRunner::default();
        let output = runner
            .run("sh", &["-c", "exit 3"], &cwd(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let runner = ToolRunner::default();
        let result = runner
            .run(
                "definitely-not-a-real-binary-xyz",
                &[],
                &cwd(),
                Duration::from_secs(5),
            )
            .await;

        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let runner = ToolRunner::new(Duration::from_millis(200));
        let started = Instant::now();
        let output = runner
            .run(
                "sh",
                &["-c", "sleep 30"],
                &cwd(),
                Duration::from_millis(100),
            )
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(output.exit_code.is_none());
        assert!(output.signal.is_some());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stubborn_process_is_killed() {
        // Traps SIGTERM, so only the forceful kill can stop it.
        let runner = ToolRunner::new(Duration::from_millis(200));
        let output = runner
            .run(
                "sh",
                &["-c", "trap '' TERM; sleep 30"],
                &cwd(),
                Duration::from_millis(100),
            )
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(output.exit_code.is_none());
    }
}
