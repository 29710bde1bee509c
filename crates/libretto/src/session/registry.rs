//! Session registry: owns every drafting session for the process lifetime.
//!
//! The one-active-session-per-project rule is enforced here at `start` time
//! by scanning existing sessions, not by a lock around the whole run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use crate::agent::AgentClient;
use crate::project::ProjectLayout;
use crate::settings::Settings;

use super::controller;
use super::{SessionError, SessionSnapshot, SessionStatus, StartedSession, WriteSession};

pub(crate) struct SessionHandle {
    pub project_root: PathBuf,
    pub cancel: CancellationToken,
    state: RwLock<WriteSession>,
}

impl SessionHandle {
    pub fn read(&self) -> RwLockReadGuard<'_, WriteSession> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Session state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, WriteSession> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Session state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

pub struct SessionRegistry {
    settings: Arc<Settings>,
    agent: Arc<dyn AgentClient>,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(settings: Arc<Settings>, agent: Arc<dyn AgentClient>) -> Self {
        Self {
            settings,
            agent,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a drafting session for the project, or returns the already
    /// active one unchanged (idempotent start).
    pub fn start(&self, project: &ProjectLayout) -> StartedSession {
        let mut sessions = self.lock_sessions();

        for handle in sessions.values() {
            if handle.project_root == project.root() {
                let state = handle.read();
                if state.status.is_active() {
                    info!(
                        "Returning existing active session {} for {}",
                        state.id,
                        project.root().display()
                    );
                    return StartedSession {
                        session_id: state.id.clone(),
                        started_at: state.started_at,
                    };
                }
            }
        }

        let session = WriteSession::new(self.settings.session_log_cap);
        let started = StartedSession {
            session_id: session.id.clone(),
            started_at: session.started_at,
        };
        let handle = Arc::new(SessionHandle {
            project_root: project.root().to_path_buf(),
            cancel: CancellationToken::new(),
            state: RwLock::new(session),
        });
        sessions.insert(started.session_id.clone(), Arc::clone(&handle));
        drop(sessions);

        info!(
            "Starting write session {} for {}",
            started.session_id,
            project.root().display()
        );

        let agent = Arc::clone(&self.agent);
        let project = project.clone();
        tokio::spawn(
            controller::run(handle, project, agent)
                .instrument(info_span!("session.run", id = %started.session_id)),
        );

        started
    }

    /// Logs with index ≥ `after_log_index` (bounded batch) plus progress.
    pub fn poll(
        &self,
        session_id: &str,
        after_log_index: u64,
    ) -> Result<SessionSnapshot, SessionError> {
        let handle = self.get(session_id)?;
        let state = handle.read();

        let logs = state.logs_after(after_log_index, self.settings.poll_batch);
        let next_log_index = logs
            .last()
            .map(|entry| entry.index + 1)
            .unwrap_or(after_log_index);

        Ok(SessionSnapshot {
            session_id: state.id.clone(),
            status: state.status,
            current_chapter_index: state.current_chapter_index,
            total_chapters: state.total_chapters,
            thread_id: state.thread_id.clone(),
            started_at: state.started_at,
            updated_at: state.updated_at,
            completed_at: state.completed_at,
            logs,
            next_log_index,
        })
    }

    /// Requests cooperative cancellation. The controller checks the flag
    /// between chapters; an in-flight turn is aborted via the token.
    pub fn cancel(&self, session_id: &str) -> Result<(), SessionError> {
        let handle = self.get(session_id)?;
        {
            let mut state = handle.write();
            if state.status.is_terminal() {
                return Ok(());
            }
            state.cancel_requested = true;
        }
        handle.cancel.cancel();
        info!("Cancellation requested for session {}", session_id);
        Ok(())
    }

    /// Current status, mostly for tests and the UI status bar.
    pub fn status(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        Ok(self.get(session_id)?.read().status)
    }

    fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        self.lock_sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Session registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
