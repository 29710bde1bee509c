//! Job persistence: one JSON document per job, plus an in-memory index for
//! jobs still tracked by this process.
//!
//! The in-memory copy always wins over the persisted one when both exist,
//! since the worker may be a step ahead of the last completed disk write.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use log::warn;

use crate::project::ProjectLayout;

use super::{JobError, TranscriptionJob};

#[derive(Default)]
pub struct JobStore {
    index: RwLock<HashMap<String, TranscriptionJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the in-memory index.
    pub fn upsert(&self, job: &TranscriptionJob) {
        let mut index = match self.index.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Job index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        index.insert(job.id.clone(), job.clone());
    }

    pub fn get(&self, job_id: &str) -> Option<TranscriptionJob> {
        let index = match self.index.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Job index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        index.get(job_id).cloned()
    }

    /// Writes the job's metadata file and updates the index. Callers persist
    /// before acting on a transition so a crash never loses a state change.
    ///
    /// The document is written to a sibling temp file and renamed into
    /// place. Rename is atomic on the same filesystem, so a reader sees
    /// either the previous complete document or the new one, never a torn
    /// write.
    pub fn persist(&self, jobs_dir: &Path, job: &TranscriptionJob) -> Result<(), JobError> {
        let path = jobs_dir.join(format!("{}.json", job.id));
        let tmp = jobs_dir.join(format!("{}.json.tmp", job.id));
        let json = serde_json::to_string_pretty(job)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .map_err(|source| JobError::Persist {
                path: path.clone(),
                source,
            })?;
        std::fs::write(&tmp, json).map_err(|source| JobError::Persist {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| JobError::Persist {
            path: path.clone(),
            source,
        })?;
        self.upsert(job);
        Ok(())
    }

    /// Recovers jobs from persisted metadata files. Unreadable files are
    /// skipped with a warning rather than failing the whole listing.
    pub fn scan(jobs_dir: &Path) -> Vec<TranscriptionJob> {
        let mut jobs = Vec::new();
        let entries = match std::fs::read_dir(jobs_dir) {
            Ok(entries) => entries,
            Err(_) => return jobs,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
            }
        }
        jobs
    }

    /// Merges persisted jobs with in-memory ones for a project, newest
    /// updated first.
    pub fn list(&self, project: &ProjectLayout) -> Vec<TranscriptionJob> {
        let mut merged: HashMap<String, TranscriptionJob> = Self::scan(&project.jobs_dir())
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();

        {
            let index = match self.index.read() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("Job index lock was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            for job in index.values() {
                if project.contains(&job.source_audio_path) {
                    merged.insert(job.id.clone(), job.clone());
                }
            }
        }

        let mut jobs: Vec<TranscriptionJob> = merged.into_values().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs
    }
}
