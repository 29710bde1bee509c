//! Production agent adapter: drives the `codex` CLI in headless JSONL mode.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::compile::bounded_tail;
use crate::tool::ToolRunner;

use super::{AgentClient, AgentError, AgentEvent, EventStream, TurnRequest};

/// Longest stderr excerpt attached to a crash report.
const STDERR_TAIL_CHARS: usize = 2000;

pub struct AgentCli {
    runner: ToolRunner,
    binary: String,
    probe_timeout: Duration,
}

impl AgentCli {
    pub fn new(runner: ToolRunner, binary: String, probe_timeout: Duration) -> Self {
        Self {
            runner,
            binary,
            probe_timeout,
        }
    }
}

#[async_trait]
impl AgentClient for AgentCli {
    async fn probe(&self) -> Result<(), AgentError> {
        let cwd = std::env::temp_dir();

        let version = self
            .runner
            .run(&self.binary, &["--version"], &cwd, self.probe_timeout)
            .await
            .map_err(|_| AgentError::NotInstalled {
                binary: self.binary.clone(),
            })?;
        if !version.success() {
            return Err(AgentError::NotInstalled {
                binary: self.binary.clone(),
            });
        }
        debug!(
            "Agent CLI present: {}",
            version.stdout.lines().next().unwrap_or("").trim()
        );

        // An API key in the environment substitutes for a CLI login.
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return Ok(());
        }

        let login = self
            .runner
            .run(&self.binary, &["login", "status"], &cwd, self.probe_timeout)
            .await
            .map_err(|e| AgentError::Io(e.to_string()))?;
        if !login.success() {
            return Err(AgentError::NotAuthenticated {
                binary: self.binary.clone(),
            });
        }
        Ok(())
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AgentError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("exec");
        if let Some(thread_id) = &request.thread_id {
            cmd.args(["resume", thread_id]);
        }
        cmd.args(["--json", "--sandbox", "workspace-write", "--skip-git-repo-check"])
            .arg(&request.prompt)
            .current_dir(&request.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::NotInstalled {
                    binary: self.binary.clone(),
                }
            } else {
                AgentError::Io(e.to_string())
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Io("agent stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        // Drain stderr on the side; a crashing CLI often writes its reason
        // there instead of emitting a turn_failed event.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let (tx, rx) = mpsc::channel::<Result<AgentEvent, AgentError>>(64);
        tokio::spawn(async move {
            let mut cancelled = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.start_kill();
                        let _ = tx.send(Err(AgentError::Cancelled)).await;
                        cancelled = true;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<AgentEvent>(line) {
                                Ok(event) => {
                                    if tx.send(Ok(event)).await.is_err() {
                                        break;
                                    }
                                }
                                // Forward-compatible: unknown event kinds are skipped.
                                Err(e) => debug!("Skipping unrecognized agent event: {}", e),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Agent stream read error: {}", e);
                            let _ = tx.send(Err(AgentError::Io(e.to_string()))).await;
                            break;
                        }
                    }
                }
            }
            let status = child.wait().await;
            let stderr = stderr_task.await.unwrap_or_default();
            if !cancelled {
                if let Ok(status) = status {
                    if !status.success() {
                        let mut message =
                            format!("agent process exited with {:?}", status.code());
                        let tail = bounded_tail(stderr.trim(), STDERR_TAIL_CHARS);
                        if !tail.is_empty() {
                            message.push_str(": ");
                            message.push_str(&tail);
                        }
                        let _ = tx.send(Err(AgentError::TurnFailed(message))).await;
                    }
                }
            }
        });

        Ok(Box::pin(EventRx(rx)))
    }
}

/// Stream adapter over the reader task's channel.
struct EventRx(mpsc::Receiver<Result<AgentEvent, AgentError>>);

impl Stream for EventRx {
    type Item = Result<AgentEvent, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}
