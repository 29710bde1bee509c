use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibrettoError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Compile error: {0}")]
    Compile(#[from] crate::compile::CompileError),

    #[error("Transcription error: {0}")]
    Job(#[from] crate::transcribe::JobError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Agent error: {0}")]
    Agent(#[from] crate::agent::AgentError),

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait on '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Path '{0}' escapes the project root")]
    OutsideRoot(PathBuf),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LibrettoError>;
