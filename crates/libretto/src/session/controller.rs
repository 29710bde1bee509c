//! The drafting run itself: prerequisites, one turn per chapter in ascending
//! order, then a verification turn over the master include file.

use std::sync::Arc;

use futures_util::StreamExt;
use log::info;

use crate::agent::{AgentClient, AgentError, AgentEvent, TurnRequest};
use crate::project::{Chapter, ProjectLayout, MASTER_FILE};

use super::registry::SessionHandle;
use super::{LogTone, SessionStatus};

/// Longest reasoning excerpt copied into the session log.
const REASONING_EXCERPT_CHARS: usize = 200;

pub(crate) async fn run(
    handle: Arc<SessionHandle>,
    project: ProjectLayout,
    agent: Arc<dyn AgentClient>,
) {
    {
        let mut state = handle.write();
        state.mark_running();
        state.push_log(LogTone::Info, "Write session started");
    }

    if let Err(message) = check_prerequisites(&project, agent.as_ref()).await {
        let mut state = handle.write();
        state.push_log(LogTone::Error, &message);
        state.finish(SessionStatus::Failed);
        return;
    }

    let chapters = project.chapters();
    handle.write().total_chapters = chapters.len();

    let mut thread_id: Option<String> = None;
    for (seq, chapter) in chapters.iter().enumerate() {
        // Cooperative cancellation point between turns.
        if handle.read().cancel_requested {
            finish_cancelled(&handle);
            return;
        }

        handle.write().push_log(
            LogTone::Info,
            format!("Drafting chapter {} ({})", chapter.index, chapter.name),
        );

        let prompt = chapter_prompt(&project, chapter);
        match run_turn(&handle, &project, agent.as_ref(), thread_id.clone(), prompt).await {
            Ok(opened_thread) => {
                if opened_thread.is_some() {
                    thread_id = opened_thread;
                }
                let mut state = handle.write();
                state.current_chapter_index = seq + 1;
                state.push_log(LogTone::Success, format!("Chapter {} drafted", chapter.index));
            }
            Err(e) => {
                finish_after_turn_error(&handle, e);
                return;
            }
        }
    }

    if handle.read().cancel_requested {
        finish_cancelled(&handle);
        return;
    }

    handle
        .write()
        .push_log(LogTone::Info, "Verifying manuscript structure");
    match run_turn(
        &handle,
        &project,
        agent.as_ref(),
        thread_id,
        verification_prompt(),
    )
    .await
    {
        Ok(_) => {
            let mut state = handle.write();
            state.push_log(LogTone::Success, "Verification turn completed");
            state.finish(SessionStatus::Completed);
            info!("Write session {} completed", state.id);
        }
        Err(e) => finish_after_turn_error(&handle, e),
    }
}

/// Every prerequisite failure carries the exact corrective action and the
/// session fails before a single turn starts.
async fn check_prerequisites(
    project: &ProjectLayout,
    agent: &dyn AgentClient,
) -> Result<(), String> {
    if !project.root().join(MASTER_FILE).is_file() {
        return Err(format!(
            "Project scaffold is missing {}; create the book scaffold before starting a write session",
            MASTER_FILE
        ));
    }
    if project.chapters().is_empty() {
        return Err("No chapter folders found under chapters/; add at least one chapter".to_string());
    }
    agent.probe().await.map_err(|e| e.to_string())
}

/// Runs one turn and feeds its event stream into the session log. Returns
/// the thread id when the runtime opened a new thread during this turn.
async fn run_turn(
    handle: &Arc<SessionHandle>,
    project: &ProjectLayout,
    agent: &dyn AgentClient,
    thread_id: Option<String>,
    prompt: String,
) -> Result<Option<String>, AgentError> {
    let request = TurnRequest {
        project_root: project.root().to_path_buf(),
        thread_id,
        prompt,
    };
    let mut stream = agent.run_turn(request, handle.cancel.clone()).await?;

    let mut opened_thread = None;
    let mut completed = false;
    while let Some(item) = stream.next().await {
        match item? {
            AgentEvent::ThreadStarted { thread_id } => {
                let mut state = handle.write();
                state.thread_id = Some(thread_id.clone());
                state.push_log(LogTone::Info, format!("Agent thread started: {}", thread_id));
                opened_thread = Some(thread_id);
            }
            AgentEvent::TurnStarted => {
                handle.write().push_log(LogTone::Info, "Turn started");
            }
            AgentEvent::TurnCompleted { usage } => {
                completed = true;
                if let Some(usage) = usage {
                    handle.write().push_log(
                        LogTone::Info,
                        format!(
                            "Turn used {} input / {} output tokens",
                            usage.input_tokens, usage.output_tokens
                        ),
                    );
                }
            }
            AgentEvent::TurnFailed { message } => {
                return Err(AgentError::TurnFailed(message));
            }
            AgentEvent::CommandExecution { command, exit_code } => {
                let tone = match exit_code {
                    Some(code) if code != 0 => LogTone::Error,
                    _ => LogTone::Info,
                };
                handle.write().push_log(tone, format!("$ {}", command));
            }
            AgentEvent::FileChange { path } => {
                handle.write().push_log(LogTone::Info, format!("Edited {}", path));
            }
            AgentEvent::Reasoning { text } => {
                handle
                    .write()
                    .push_log(LogTone::Info, excerpt(&text, REASONING_EXCERPT_CHARS));
            }
            AgentEvent::ToolCall { name } => {
                handle.write().push_log(LogTone::Info, format!("Tool call: {}", name));
            }
            AgentEvent::WebSearch { query } => {
                handle.write().push_log(LogTone::Info, format!("Web search: {}", query));
            }
            AgentEvent::TodoUpdate => {
                handle.write().push_log(LogTone::Info, "Plan updated");
            }
            AgentEvent::Error { message } => {
                handle.write().push_log(LogTone::Error, message);
            }
        }
    }

    if !completed {
        return Err(AgentError::TurnFailed(
            "agent event stream ended before the turn completed".to_string(),
        ));
    }
    Ok(opened_thread)
}

/// A turn error during a requested cancellation still finishes `Cancelled`;
/// the explicit flag decides, never the error text.
fn finish_after_turn_error(handle: &Arc<SessionHandle>, error: AgentError) {
    let cancel_requested = handle.read().cancel_requested;
    if matches!(error, AgentError::Cancelled) || cancel_requested {
        finish_cancelled(handle);
        return;
    }
    let mut state = handle.write();
    state.push_log(LogTone::Error, error.to_string());
    state.finish(SessionStatus::Failed);
}

fn finish_cancelled(handle: &Arc<SessionHandle>) {
    let mut state = handle.write();
    state.push_log(LogTone::Info, "Session cancelled");
    state.finish(SessionStatus::Cancelled);
    info!("Write session {} cancelled", state.id);
}

fn chapter_prompt(project: &ProjectLayout, chapter: &Chapter) -> String {
    let mut prompt = format!(
        "Draft chapter {} of the book. Work only inside chapters/{}/.\n",
        chapter.index, chapter.name
    );

    let transcript = chapter.transcript_path();
    if transcript.is_file() {
        prompt.push_str(&format!(
            "Use the author's dictated material in chapters/{}/transcript.txt as the primary source.\n",
            chapter.name
        ));
    }
    let recordings = chapter.recordings();
    if !recordings.is_empty() {
        let names: Vec<String> = recordings
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        prompt.push_str(&format!(
            "Raw recordings for reference: {}.\n",
            names.join(", ")
        ));
    }
    if project.outline_path().is_file() {
        prompt.push_str("Keep the chapter consistent with the plan in outline.md.\n");
    }
    prompt.push_str(&format!(
        "Write the prose into chapters/{}/chapter.tex as LaTeX, matching the style of existing chapters.",
        chapter.name
    ));
    prompt
}

fn verification_prompt() -> String {
    format!(
        "Reconcile {} against the chapter files actually present under chapters/: \
         every chapter.tex must be included exactly once, in ascending chapter order, \
         and stale includes must be removed. Do not rewrite any chapter content.",
        MASTER_FILE
    )
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}
