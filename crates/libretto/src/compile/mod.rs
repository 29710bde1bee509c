//! Fingerprinted, single-flight compilation of a project manuscript into a
//! previewable PDF.

mod cache;
mod compiler;
mod fingerprint;

pub use cache::CompileCache;
pub use compiler::{CompilerKind, Toolchain};
pub use fingerprint::project_fingerprint;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Subtrees never considered compile-relevant.
pub const IGNORED_DIRS: &[&str] = &["build", "recordings", ".git", ".libretto"];

/// Extensions that participate in the fingerprint.
pub const RELEVANT_EXTENSIONS: &[&str] = &["tex", "sty", "cls", "bib", "png", "jpg", "jpeg", "pdf"];

/// Result of a compile request, cached or fresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    /// True when the cached artifact was still valid and no compiler ran.
    pub cached: bool,
    pub compiler: CompilerKind,
    pub artifact_path: PathBuf,
    #[serde(skip)]
    pub duration: Duration,
    pub generated_at: DateTime<Utc>,
    /// Bounded tail of compiler output for diagnostics.
    pub log_tail: String,
}

/// Compile failures. String-only payloads keep the type `Clone`, which the
/// single-flight cache needs to hand one result to every concurrent caller.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("Entrypoint must be a .tex file, got '{0}'")]
    InvalidEntrypoint(String),

    #[error("Entrypoint not found: {0}")]
    EntrypointNotFound(PathBuf),

    #[error("No LaTeX compiler found. Install tectonic (https://tectonic-typesetting.github.io) or a TeX distribution providing pdflatex")]
    NoCompilerFound,

    #[error("Compilation failed ({compiler}): see log tail")]
    CompileFailed {
        compiler: CompilerKind,
        log_tail: String,
    },

    #[error("Compiler exited successfully but produced no artifact at {0}")]
    ArtifactMissing(PathBuf),

    #[error("Failed to fingerprint project: {0}")]
    Fingerprint(String),

    #[error("Compiler invocation failed: {0}")]
    Tool(String),

    #[error("Project error: {0}")]
    Project(String),
}

/// Keeps the most recent `max_chars` characters of compiler output, cutting
/// on a char boundary.
pub(crate) fn bounded_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
