//! External text-generation agent runtime, consumed as an abstract
//! collaborator.
//!
//! A drafting session opens one long-lived conversation ("thread") and runs
//! turns against it. Each turn produces a lazy, finite, non-restartable
//! sequence of typed events; consuming it to exhaustion or aborting via the
//! cancellation token are the two valid exits.

mod cli;

pub use cli::AgentCli;

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Token accounting reported by a completed turn.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Typed events surfaced while a turn runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ThreadStarted {
        thread_id: String,
    },
    TurnStarted,
    TurnCompleted {
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    TurnFailed {
        message: String,
    },
    /// Shell command the agent executed, with whatever output it captured.
    CommandExecution {
        command: String,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    FileChange {
        path: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        name: String,
    },
    WebSearch {
        query: String,
    },
    TodoUpdate,
    Error {
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent CLI '{binary}' is not installed. Install it with: npm install -g @openai/codex")]
    NotInstalled { binary: String },

    #[error("Agent CLI is not authenticated. Run '{binary} login' or set OPENAI_API_KEY")]
    NotAuthenticated { binary: String },

    #[error("Agent turn failed: {0}")]
    TurnFailed(String),

    #[error("Turn aborted by cancellation request")]
    Cancelled,

    #[error("Agent I/O error: {0}")]
    Io(String),
}

/// One turn request against an (optionally already-open) thread.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// The agent works inside this directory with write access restricted to
    /// it; commands the agent runs get no network access.
    pub project_root: PathBuf,
    /// Resume this thread when present; otherwise the runtime opens one and
    /// reports it via [`AgentEvent::ThreadStarted`].
    pub thread_id: Option<String>,
    pub prompt: String,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Verifies the agent runtime is installed and authenticated. Errors
    /// carry the exact corrective action for the user.
    async fn probe(&self) -> Result<(), AgentError>;

    /// Starts one turn and returns its event stream. The stream ends after
    /// a `TurnCompleted`/`TurnFailed` event, or yields
    /// [`AgentError::Cancelled`] when the token fires mid-turn.
    async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AgentError>;
}
