//! Application facade wiring the compile cache, the transcription queue and
//! the session registry together. The UI shell constructs one [`App`] at
//! startup and calls it from its command handlers.

use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;

use crate::agent::{AgentCli, AgentClient};
use crate::compile::{CompileCache, CompileError, CompileOutput, Toolchain};
use crate::error::ProjectError;
use crate::project::ProjectLayout;
use crate::session::{
    SessionError, SessionRegistry, SessionSnapshot, StartedSession,
};
use crate::settings::Settings;
use crate::tool::ToolRunner;
use crate::transcribe::{JobError, JobQueue, TranscriptionApi, TranscriptionJob, WhisperClient};

pub struct App {
    settings: Arc<Settings>,
    compile_cache: CompileCache,
    jobs: JobQueue,
    sessions: SessionRegistry,
}

impl App {
    /// Wires the production collaborators from settings.
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let runner = ToolRunner::new(settings.kill_grace());

        // The queue checks the enqueue policy before the client is ever
        // used, so a placeholder key is fine when none is configured.
        let api_key = settings
            .api_key
            .clone()
            .unwrap_or_else(|| SecretString::from(String::new()));
        let api: Arc<dyn TranscriptionApi> = Arc::new(WhisperClient::new(
            settings.transcription_endpoint.clone(),
            settings.transcription_model.clone(),
            api_key,
        ));

        let agent: Arc<dyn AgentClient> = Arc::new(AgentCli::new(
            runner.clone(),
            settings.agent_bin.clone(),
            settings.probe_timeout(),
        ));

        Self::with_collaborators(settings, runner, api, agent)
    }

    /// Wires the app around substitute collaborators. Used by tests; the
    /// production path goes through [`App::new`].
    pub fn with_collaborators(
        settings: Arc<Settings>,
        runner: ToolRunner,
        api: Arc<dyn TranscriptionApi>,
        agent: Arc<dyn AgentClient>,
    ) -> Self {
        let toolchain = Toolchain::new(
            runner,
            settings.tectonic_bin.clone(),
            settings.pdflatex_bin.clone(),
            settings.probe_timeout(),
            settings.build_timeout(),
        );
        let compile_cache = CompileCache::new(toolchain, settings.log_tail_chars);
        let jobs = JobQueue::new(Arc::clone(&settings), api);
        let sessions = SessionRegistry::new(Arc::clone(&settings), agent);

        Self {
            settings,
            compile_cache,
            jobs,
            sessions,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens an existing project directory.
    pub fn open_project(&self, root: impl AsRef<Path>) -> Result<ProjectLayout, ProjectError> {
        ProjectLayout::open(root.as_ref())
    }

    /// Compiles the entrypoint, serving from cache when nothing changed.
    pub async fn compile(
        &self,
        project: &ProjectLayout,
        entrypoint: &str,
    ) -> Result<CompileOutput, CompileError> {
        self.compile_cache.compile(project, entrypoint).await
    }

    /// Schedules transcription for a saved recording. `Ok(None)` means the
    /// enqueue policy skipped it (no API key or auto-transcribe off).
    pub async fn enqueue_transcription(
        &self,
        project: &ProjectLayout,
        source_audio: &Path,
        output_text: &Path,
    ) -> Result<Option<TranscriptionJob>, JobError> {
        self.jobs.enqueue(project, source_audio, output_text).await
    }

    /// Transcription jobs for a project, newest-updated first.
    pub fn list_transcription_jobs(&self, project: &ProjectLayout) -> Vec<TranscriptionJob> {
        self.jobs.list(project)
    }

    /// Starts a drafting session, or returns the active one for this project.
    pub fn start_write_session(&self, project: &ProjectLayout) -> StartedSession {
        self.sessions.start(project)
    }

    /// Session progress plus log entries at or past `after_log_index`.
    pub fn poll_write_session(
        &self,
        session_id: &str,
        after_log_index: u64,
    ) -> Result<SessionSnapshot, SessionError> {
        self.sessions.poll(session_id, after_log_index)
    }

    /// Requests cooperative cancellation of a drafting session.
    pub fn cancel_write_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.cancel(session_id)
    }
}
