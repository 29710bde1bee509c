//! Deterministic content fingerprint over a project's compile-relevant files.

use std::fmt::Write as _;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{CompileError, IGNORED_DIRS, RELEVANT_EXTENSIONS};

/// Hashes the sorted list of `relative_path|size|mtime` tuples for every
/// compile-relevant file under `root`, together with the entrypoint name.
///
/// Sorting before hashing makes the digest independent of directory
/// traversal order, so the same file set always produces the same value.
pub fn project_fingerprint(root: &Path, entrypoint: &str) -> Result<String, CompileError> {
    let mut tuples: Vec<String> = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !IGNORED_DIRS.contains(&name.as_ref())
    });

    for entry in walker {
        let entry = entry.map_err(|e| CompileError::Fingerprint(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relevant = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| RELEVANT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !relevant {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| CompileError::Fingerprint(e.to_string()))?;
        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let mut tuple = String::new();
        let _ = write!(tuple, "{}|{}|{}", relative, metadata.len(), mtime_nanos);
        tuples.push(tuple);
    }

    tuples.sort();

    let mut hasher = Sha256::new();
    hasher.update(entrypoint.as_bytes());
    hasher.update(b"\n");
    for tuple in &tuples {
        hasher.update(tuple.as_bytes());
        hasher.update(b"\n");
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_stable_across_repeated_runs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "book.tex", "\\documentclass{book}");
        write(tmp.path(), "chapters/01/chapter.tex", "one");
        write(tmp.path(), "chapters/02/chapter.tex", "two");

        let first = project_fingerprint(tmp.path(), "book.tex").unwrap();
        let second = project_fingerprint(tmp.path(), "book.tex").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_entrypoint_name_participates() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "book.tex", "x");
        write(tmp.path(), "draft.tex", "x");

        let a = project_fingerprint(tmp.path(), "book.tex").unwrap();
        let b = project_fingerprint(tmp.path(), "draft.tex").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_irrelevant_and_ignored_files_do_not_matter() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "book.tex", "x");
        let before = project_fingerprint(tmp.path(), "book.tex").unwrap();

        write(tmp.path(), "notes.txt", "scratch");
        write(tmp.path(), "build/book.pdf", "artifact");
        write(tmp.path(), "recordings/take1.wav", "audio");
        write(tmp.path(), ".libretto/jobs/j.json", "{}");
        let after = project_fingerprint(tmp.path(), "book.tex").unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_content_size_change_is_detected() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "book.tex", "short");
        let before = project_fingerprint(tmp.path(), "book.tex").unwrap();

        write(tmp.path(), "book.tex", "much longer content");
        let after = project_fingerprint(tmp.path(), "book.tex").unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_new_relevant_file_is_detected() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "book.tex", "x");
        let before = project_fingerprint(tmp.path(), "book.tex").unwrap();

        write(tmp.path(), "preamble.sty", "y");
        let after = project_fingerprint(tmp.path(), "book.tex").unwrap();

        assert_ne!(before, after);
    }
}
