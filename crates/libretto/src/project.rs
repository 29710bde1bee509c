//! On-disk layout of a book project.
//!
//! A scaffolded project looks like:
//!
//! ```text
//! my-book/
//!   book.tex           <- master include file (compile entrypoint)
//!   outline.md         <- book outline consulted by drafting sessions
//!   chapters/
//!     01-introduction/
//!       recording.m4a
//!       transcript.txt
//!       chapter.tex
//!     02-the-middle/
//!       ...
//!   build/             <- compiler output (ignored by fingerprinting)
//!   .libretto/
//!     jobs/            <- transcription job metadata
//! ```

use std::path::{Path, PathBuf};

use crate::error::ProjectError;

/// File extensions recognized as chapter voice recordings.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "m4a", "mp3", "ogg", "flac", "webm"];

/// Name of the master include file at the project root.
pub const MASTER_FILE: &str = "book.tex";

/// Name of the build output directory under the project root.
pub const BUILD_DIR: &str = "build";

/// Name of the tool-private metadata directory under the project root.
pub const META_DIR: &str = ".libretto";

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

/// One chapter directory, ordered by its numeric prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based chapter number parsed from the directory name prefix.
    pub index: usize,
    /// Directory name, e.g. `01-introduction`.
    pub name: String,
    /// Absolute chapter directory path.
    pub dir: PathBuf,
}

impl Chapter {
    /// Conventional transcript location inside the chapter directory.
    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join("transcript.txt")
    }

    /// Recordings present in the chapter directory, sorted by file name.
    pub fn recordings(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        found.sort();
        found
    }
}

impl ProjectLayout {
    /// Opens an existing project directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ProjectError::NotFound(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a project-relative entrypoint name, refusing anything that
    /// would escape the project root.
    pub fn entrypoint_path(&self, entrypoint: &str) -> Result<PathBuf, ProjectError> {
        let candidate = Path::new(entrypoint);
        if candidate.is_absolute()
            || candidate
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ProjectError::OutsideRoot(candidate.to_path_buf()));
        }
        Ok(self.root.join(candidate))
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(BUILD_DIR)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join(META_DIR).join("jobs")
    }

    pub fn outline_path(&self) -> PathBuf {
        self.root.join("outline.md")
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.root.join("chapters")
    }

    /// Enumerates chapter directories in ascending index order.
    ///
    /// Directories without a leading number are skipped with a warning; they
    /// are usually scratch folders the author created by hand.
    pub fn chapters(&self) -> Vec<Chapter> {
        let chapters_dir = self.chapters_dir();
        let mut chapters: Vec<Chapter> = std::fs::read_dir(&chapters_dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                match parse_chapter_index(&name) {
                    Some(index) => Some(Chapter {
                        index,
                        name,
                        dir: entry.path(),
                    }),
                    None => {
                        log::warn!("Skipping chapter directory without numeric prefix: {}", name);
                        None
                    }
                }
            })
            .collect();
        chapters.sort_by_key(|c| (c.index, c.name.clone()));
        chapters
    }

    /// Ensures the tool-private jobs directory exists.
    pub fn ensure_jobs_dir(&self) -> Result<PathBuf, ProjectError> {
        let dir = self.jobs_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ProjectError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Ensures the build output directory exists.
    pub fn ensure_build_dir(&self) -> Result<PathBuf, ProjectError> {
        let dir = self.build_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ProjectError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// True when `path` is inside the project root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

/// Parses the leading chapter number from a directory name such as
/// `01-introduction` or `12_closing`.
fn parse_chapter_index(name: &str) -> Option<usize> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
