//! Durable, observable background transcription jobs.
//!
//! Saving a recording may enqueue one [`TranscriptionJob`]; its worker
//! uploads the audio to the remote speech-to-text service and writes the
//! returned text next to the recording. Every status change is persisted to
//! `<project>/.libretto/jobs/` before the worker proceeds, so jobs survive a
//! process restart in a consistent state.

mod api;
mod queue;
mod store;

pub use api::{TranscriptionApi, WhisperClient};
pub use queue::JobQueue;
pub use store::JobStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Written to the output target when the service returns an empty result.
pub const EMPTY_TRANSCRIPT_SENTINEL: &str = "[transcription returned no text]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the forward-only lifecycle.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJob {
    pub id: String,
    pub status: JobStatus,
    pub source_audio_path: PathBuf,
    pub output_text_path: PathBuf,
    pub file_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionJob {
    pub fn new(source_audio_path: PathBuf, output_text_path: PathBuf, file_size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            source_audio_path,
            output_text_path,
            file_size_bytes,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Moves the job forward. Transitions never regress and a terminal job
    /// never resumes; an illegal transition is refused and logged.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            log::warn!(
                "Refusing job {} transition {:?} -> {:?}",
                self.id,
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to read audio file '{path}': {source}")]
    ReadAudio {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist job metadata '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write transcript '{path}': {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio file is {actual_bytes} bytes, which exceeds the {limit_bytes} byte upload limit. Split the recording or compress it before transcribing")]
    TooLarge { actual_bytes: u64, limit_bytes: u64 },

    #[error("Transcription service error: {0}")]
    Api(String),

    #[error("Project error: {0}")]
    Project(#[from] crate::error::ProjectError),
}
