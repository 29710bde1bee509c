//! Sequential multi-turn drafting sessions against the external agent.

mod controller;
mod registry;

pub use registry::SessionRegistry;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTone {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogEntry {
    /// Strictly monotonically increasing, survives cap-driven eviction.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub tone: LogTone,
    pub text: String,
}

/// Full mutable state of one drafting run.
#[derive(Debug)]
pub struct WriteSession {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of chapter turns completed so far.
    pub current_chapter_index: usize,
    pub total_chapters: usize,
    pub thread_id: Option<String>,
    pub cancel_requested: bool,
    logs: VecDeque<SessionLogEntry>,
    next_log_index: u64,
    log_cap: usize,
}

impl WriteSession {
    pub fn new(log_cap: usize) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Queued,
            started_at: now,
            updated_at: now,
            completed_at: None,
            current_chapter_index: 0,
            total_chapters: 0,
            thread_id: None,
            cancel_requested: false,
            logs: VecDeque::new(),
            next_log_index: 0,
            log_cap,
        }
    }

    /// Appends a log line, evicting the oldest entry past the cap. Indices
    /// keep counting up even after eviction so poll cursors stay valid.
    pub fn push_log(&mut self, tone: LogTone, text: impl Into<String>) {
        let entry = SessionLogEntry {
            index: self.next_log_index,
            timestamp: Utc::now(),
            tone,
            text: text.into(),
        };
        self.next_log_index += 1;
        self.logs.push_back(entry);
        while self.logs.len() > self.log_cap {
            self.logs.pop_front();
        }
        self.updated_at = Utc::now();
    }

    /// Moves to a terminal status exactly once; later attempts are ignored.
    pub fn finish(&mut self, status: SessionStatus) -> bool {
        if self.status.is_terminal() {
            log::warn!(
                "Ignoring finish({:?}) on terminal session {} ({:?})",
                status,
                self.id,
                self.status
            );
            return false;
        }
        self.status = status;
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    pub fn mark_running(&mut self) {
        if self.status == SessionStatus::Queued {
            self.status = SessionStatus::Running;
            self.updated_at = Utc::now();
        }
    }

    /// Log entries with `index >= after`, at most `limit` of them.
    pub fn logs_after(&self, after: u64, limit: usize) -> Vec<SessionLogEntry> {
        self.logs
            .iter()
            .filter(|entry| entry.index >= after)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn next_log_index(&self) -> u64 {
        self.next_log_index
    }
}

/// Caller-facing view returned by `poll`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub current_chapter_index: usize,
    pub total_chapters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub logs: Vec<SessionLogEntry>,
    /// Pass this as `after_log_index` on the next poll.
    pub next_log_index: u64,
}

/// Returned by `start`; an idempotent re-start returns the existing values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Project error: {0}")]
    Project(#[from] crate::error::ProjectError),
}
