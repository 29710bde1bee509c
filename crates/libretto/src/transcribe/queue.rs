//! Job queue: enqueue policy plus the per-job worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use tracing::{info_span, Instrument};

use crate::project::ProjectLayout;
use crate::settings::Settings;

use super::{JobError, JobStatus, JobStore, TranscriptionApi, TranscriptionJob, EMPTY_TRANSCRIPT_SENTINEL};

pub struct JobQueue {
    settings: Arc<Settings>,
    store: Arc<JobStore>,
    api: Arc<dyn TranscriptionApi>,
}

impl JobQueue {
    pub fn new(settings: Arc<Settings>, api: Arc<dyn TranscriptionApi>) -> Self {
        Self {
            settings,
            store: Arc::new(JobStore::new()),
            api,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Creates and schedules a transcription job for a saved recording.
    ///
    /// Returns `Ok(None)` when transcription preconditions are not met (no
    /// API key, or auto-transcribe disabled). That is a policy skip, not an
    /// error.
    pub async fn enqueue(
        &self,
        project: &ProjectLayout,
        source_audio: &Path,
        output_text: &Path,
    ) -> Result<Option<TranscriptionJob>, JobError> {
        if !self.settings.transcription_enabled() {
            info!(
                "Skipping transcription for {}: not enabled (api key or preference missing)",
                source_audio.display()
            );
            return Ok(None);
        }

        let metadata =
            tokio::fs::metadata(source_audio)
                .await
                .map_err(|source| JobError::ReadAudio {
                    path: source_audio.to_path_buf(),
                    source,
                })?;

        let jobs_dir = project.ensure_jobs_dir()?;
        let job = TranscriptionJob::new(
            source_audio.to_path_buf(),
            output_text.to_path_buf(),
            metadata.len(),
        );
        self.store.persist(&jobs_dir, &job)?;

        info!(
            "Enqueued transcription job {} for {}",
            job.id,
            source_audio.display()
        );

        let store = Arc::clone(&self.store);
        let api = Arc::clone(&self.api);
        let ceiling = self.settings.upload_ceiling_bytes;
        let worker_job = job.clone();
        tokio::spawn(
            run_job(store, api, jobs_dir, ceiling, worker_job)
                .instrument(info_span!("transcribe.job", id = %job.id)),
        );

        Ok(Some(job))
    }

    /// Jobs for a project, persisted plus in-memory, newest-updated first.
    pub fn list(&self, project: &ProjectLayout) -> Vec<TranscriptionJob> {
        self.store.list(project)
    }
}

/// Runs one job to a terminal state. Never re-entered for the same job.
pub(crate) async fn run_job(
    store: Arc<JobStore>,
    api: Arc<dyn TranscriptionApi>,
    jobs_dir: PathBuf,
    ceiling_bytes: u64,
    mut job: TranscriptionJob,
) {
    job.transition(JobStatus::InProgress);
    persist_or_log(&store, &jobs_dir, &job);

    match execute(&api, ceiling_bytes, &job).await {
        Ok(()) => {
            job.transition(JobStatus::Completed);
            persist_or_log(&store, &jobs_dir, &job);
            info!("Transcription job {} completed", job.id);
        }
        Err(e) => {
            let message = e.to_string();
            warn!("Transcription job {} failed: {}", job.id, message);
            append_failure_note(&job.output_text_path, &message).await;
            job.error = Some(message);
            job.transition(JobStatus::Failed);
            persist_or_log(&store, &jobs_dir, &job);
        }
    }
}

async fn execute(
    api: &Arc<dyn TranscriptionApi>,
    ceiling_bytes: u64,
    job: &TranscriptionJob,
) -> Result<(), JobError> {
    // Local validation failure: never attempt the upload.
    if job.file_size_bytes > ceiling_bytes {
        return Err(JobError::TooLarge {
            actual_bytes: job.file_size_bytes,
            limit_bytes: ceiling_bytes,
        });
    }

    let text = api.transcribe(&job.source_audio_path).await?;
    let text = if text.trim().is_empty() {
        EMPTY_TRANSCRIPT_SENTINEL.to_string()
    } else {
        text
    };

    tokio::fs::write(&job.output_text_path, text)
        .await
        .map_err(|source| JobError::WriteOutput {
            path: job.output_text_path.clone(),
            source,
        })
}

/// Appends a visible failure note to the output target, preserving whatever
/// content is already there.
async fn append_failure_note(output_path: &Path, message: &str) {
    let existing = tokio::fs::read_to_string(output_path)
        .await
        .unwrap_or_default();
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&format!("\n[transcription failed: {}]\n", message));
    if let Err(e) = tokio::fs::write(output_path, content).await {
        error!(
            "Failed to write failure note to {}: {}",
            output_path.display(),
            e
        );
    }
}

fn persist_or_log(store: &JobStore, jobs_dir: &Path, job: &TranscriptionJob) {
    if let Err(e) = store.persist(jobs_dir, job) {
        error!("Failed to persist job {}: {}", job.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Scripted stand-in for the remote service, counting calls so tests can
    /// assert the oversized short-circuit never touches the network.
    struct MockApi {
        response: Result<String, String>,
        calls: AtomicUsize,
    }

    impl MockApi {
        fn returning(text: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranscriptionApi for MockApi {
        async fn transcribe(&self, _audio_path: &Path) -> Result<String, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(JobError::Api)
        }
    }

    fn settings_with_key() -> Arc<Settings> {
        Arc::new(
            Settings::default().with_api_key(Some(SecretString::from("sk-test".to_string()))),
        )
    }

    fn scaffold() -> (TempDir, ProjectLayout, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let audio = tmp.path().join("recording.wav");
        let output = tmp.path().join("transcript.txt");
        std::fs::write(&audio, vec![0u8; 128]).unwrap();
        let project = ProjectLayout::open(tmp.path()).unwrap();
        (tmp, project, audio, output)
    }

    async fn wait_terminal(store: &Arc<JobStore>, id: &str) -> TranscriptionJob {
        for _ in 0..200 {
            if let Some(job) = store.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_policy_skip_without_api_key() {
        let (_tmp, project, audio, output) = scaffold();
        let queue = JobQueue::new(Arc::new(Settings::default()), MockApi::returning("hi"));

        let result = queue.enqueue(&project, &audio, &output).await.unwrap();
        assert!(result.is_none());
        assert!(queue.list(&project).is_empty());
    }

    #[tokio::test]
    async fn test_policy_skip_when_auto_transcribe_disabled() {
        let (_tmp, project, audio, output) = scaffold();
        let mut settings = Settings::default()
            .with_api_key(Some(SecretString::from("sk-test".to_string())));
        settings.auto_transcribe = false;

        let queue = JobQueue::new(Arc::new(settings), MockApi::returning("hi"));
        let result = queue.enqueue(&project, &audio, &output).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_successful_job_writes_transcript() {
        let (_tmp, project, audio, output) = scaffold();
        let api = MockApi::returning("chapter one, take one");
        let queue = JobQueue::new(settings_with_key(), api.clone());

        let job = queue
            .enqueue(&project, &audio, &output)
            .await
            .unwrap()
            .expect("job should be created");
        assert_eq!(job.status, JobStatus::Queued);

        let done = wait_terminal(queue.store(), &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "chapter one, take one"
        );
        assert_eq!(api.call_count(), 1);

        // The persisted copy reflects the terminal state too.
        let listed = queue.list(&project);
        assert_eq!(listed[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_response_writes_sentinel() {
        let (_tmp, project, audio, output) = scaffold();
        let queue = JobQueue::new(settings_with_key(), MockApi::returning("   "));

        let job = queue.enqueue(&project, &audio, &output).await.unwrap().unwrap();
        wait_terminal(queue.store(), &job.id).await;

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            EMPTY_TRANSCRIPT_SENTINEL
        );
    }

    #[tokio::test]
    async fn test_oversized_upload_short_circuits() {
        let (_tmp, project, audio, output) = scaffold();
        let mut settings =
            Settings::default().with_api_key(Some(SecretString::from("sk-test".to_string())));
        settings.upload_ceiling_bytes = 64; // recording.wav is 128 bytes

        let api = MockApi::returning("never used");
        let queue = JobQueue::new(Arc::new(settings), api.clone());

        let job = queue.enqueue(&project, &audio, &output).await.unwrap().unwrap();
        let done = wait_terminal(queue.store(), &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(api.call_count(), 0, "oversized upload must not hit the network");
        let error = done.error.unwrap();
        assert!(error.contains("exceeds"), "unexpected error: {}", error);
    }

    #[tokio::test]
    async fn test_failure_appends_note_preserving_content() {
        let (_tmp, project, audio, output) = scaffold();
        std::fs::write(&output, "draft notes so far\n").unwrap();

        let queue = JobQueue::new(settings_with_key(), MockApi::failing("server on fire"));
        let job = queue.enqueue(&project, &audio, &output).await.unwrap().unwrap();
        let done = wait_terminal(queue.store(), &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.starts_with("draft notes so far"));
        assert!(content.contains("server on fire"));
    }

    #[tokio::test]
    async fn test_status_sequence_is_monotonic() {
        let (_tmp, project, audio, output) = scaffold();
        let queue = JobQueue::new(settings_with_key(), MockApi::returning("text"));

        let job = queue.enqueue(&project, &audio, &output).await.unwrap().unwrap();

        // Observe statuses over time; the observed sequence must be a prefix
        // of queued -> in_progress -> terminal with no regressions.
        let mut last_rank = 0u8;
        loop {
            let current = queue.store().get(&job.id).unwrap();
            let rank = match current.status {
                JobStatus::Queued => 0,
                JobStatus::InProgress => 1,
                JobStatus::Completed | JobStatus::Failed => 2,
            };
            assert!(rank >= last_rank, "status regressed");
            last_rank = rank;
            if current.status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
