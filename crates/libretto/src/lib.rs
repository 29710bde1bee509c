pub mod agent;
pub mod app;
pub mod compile;
pub mod error;
pub mod logging;
pub mod project;
pub mod session;
pub mod settings;
pub mod tool;
pub mod transcribe;

pub use agent::{AgentClient, AgentError, AgentEvent, EventStream, TurnRequest};
pub use app::App;
pub use compile::{CompileCache, CompileError, CompileOutput, CompilerKind};
pub use error::{LibrettoError, ProjectError, Result, ToolError};
pub use project::{Chapter, ProjectLayout};
pub use session::{
    SessionError, SessionRegistry, SessionSnapshot, SessionStatus, StartedSession,
};
pub use settings::Settings;
pub use tool::{ToolOutput, ToolRunner};
pub use transcribe::{JobError, JobQueue, JobStatus, JobStore, TranscriptionJob, WhisperClient};
