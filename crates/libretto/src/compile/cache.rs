//! Process-lifetime compile cache with single-flight builds.
//!
//! At most one build runs per `(project, entrypoint)` key. Concurrent callers
//! for the same key await one shared in-flight future, so a burst of compile
//! requests can never run two compilers into the same build directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use tracing::{info_span, Instrument};

use crate::project::ProjectLayout;

use super::{bounded_tail, project_fingerprint, CompileError, CompileOutput, CompilerKind, Toolchain};

type CacheKey = (PathBuf, String);
type BuildFuture = Shared<BoxFuture<'static, Result<CompileOutput, CompileError>>>;

/// Last successful build for a key. Replaced wholesale on every rebuild,
/// never partially updated.
#[derive(Debug, Clone)]
struct CacheEntry {
    fingerprint: String,
    compiler: CompilerKind,
    artifact_path: PathBuf,
    log_tail: String,
    generated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<BuildFuture>,
}

struct Inner {
    toolchain: Toolchain,
    log_tail_chars: usize,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

#[derive(Clone)]
pub struct CompileCache {
    inner: Arc<Inner>,
}

impl CompileCache {
    pub fn new(toolchain: Toolchain, log_tail_chars: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                toolchain,
                log_tail_chars,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Compiles `entrypoint` inside `project`, returning a cached artifact
    /// when the project fingerprint is unchanged and the artifact still
    /// exists on disk.
    pub async fn compile(
        &self,
        project: &ProjectLayout,
        entrypoint: &str,
    ) -> Result<CompileOutput, CompileError> {
        if !entrypoint.to_ascii_lowercase().ends_with(".tex") {
            return Err(CompileError::InvalidEntrypoint(entrypoint.to_string()));
        }

        let entry_path = project
            .entrypoint_path(entrypoint)
            .map_err(|e| CompileError::Project(e.to_string()))?;
        if !entry_path.is_file() {
            return Err(CompileError::EntrypointNotFound(entry_path));
        }

        let fingerprint = project_fingerprint(project.root(), entrypoint)?;
        let key: CacheKey = (project.root().to_path_buf(), entrypoint.to_string());

        let build = {
            let mut slots = lock_or_recover(&self.inner.slots);
            let slot = slots.entry(key.clone()).or_default();

            // A build already running for this key serves every caller.
            if let Some(in_flight) = slot.in_flight.clone() {
                debug!("Joining in-flight build for {:?}", key);
                drop(slots);
                return in_flight.await;
            }

            // Valid cached artifact: fingerprint unchanged and file present.
            if let Some(entry) = &slot.entry {
                if entry.fingerprint == fingerprint && entry.artifact_path.is_file() {
                    debug!("Compile cache hit for {:?}", key);
                    return Ok(CompileOutput {
                        cached: true,
                        compiler: entry.compiler,
                        artifact_path: entry.artifact_path.clone(),
                        duration: Duration::ZERO,
                        generated_at: entry.generated_at,
                        log_tail: entry.log_tail.clone(),
                    });
                }
            }

            let inner = Arc::clone(&self.inner);
            let project = project.clone();
            let span = info_span!("compile.build", entrypoint = %entrypoint);
            let entrypoint = entrypoint.to_string();
            let future_key = key.clone();
            let future: BuildFuture = async move {
                let result = run_build(&inner, &project, &entrypoint).await;
                finish_build(&inner, &future_key, fingerprint, &result);
                result
            }
            .instrument(span)
            .boxed()
            .shared();

            slot.in_flight = Some(future.clone());
            future
        };

        build.await
    }
}

/// One fresh build: probe, invoke, verify artifact.
async fn run_build(
    inner: &Inner,
    project: &ProjectLayout,
    entrypoint: &str,
) -> Result<CompileOutput, CompileError> {
    let started = Instant::now();

    let compiler = inner.toolchain.detect(project.root()).await?;
    let build_dir = project
        .ensure_build_dir()
        .map_err(|e| CompileError::Project(e.to_string()))?;

    let log = match inner
        .toolchain
        .build(compiler, project.root(), entrypoint, &build_dir)
        .await
    {
        Ok(log) => log,
        Err(CompileError::CompileFailed { compiler, log_tail }) => {
            return Err(CompileError::CompileFailed {
                compiler,
                log_tail: bounded_tail(&log_tail, inner.log_tail_chars),
            });
        }
        Err(other) => return Err(other),
    };

    let artifact_path = Toolchain::artifact_path(&build_dir, entrypoint);
    if !artifact_path.is_file() {
        // A zero-exit compiler that produced nothing is still a failure.
        return Err(CompileError::ArtifactMissing(artifact_path));
    }

    let output = CompileOutput {
        cached: false,
        compiler,
        artifact_path,
        duration: started.elapsed(),
        generated_at: Utc::now(),
        log_tail: bounded_tail(&log, inner.log_tail_chars),
    };
    info!(
        "Compiled {} with {} in {:?}",
        entrypoint, compiler, output.duration
    );
    Ok(output)
}

/// Clears the in-flight marker and, on success, replaces the cache entry.
fn finish_build(
    inner: &Inner,
    key: &CacheKey,
    fingerprint: String,
    result: &Result<CompileOutput, CompileError>,
) {
    let mut slots = lock_or_recover(&inner.slots);
    if let Some(slot) = slots.get_mut(key) {
        slot.in_flight = None;
        if let Ok(output) = result {
            slot.entry = Some(CacheEntry {
                fingerprint,
                compiler: output.compiler,
                artifact_path: output.artifact_path.clone(),
                log_tail: output.log_tail.clone(),
                generated_at: output.generated_at,
            });
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Compile cache lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tool::ToolRunner;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Fake tectonic: `$2` is the --outdir argument, `$4` the entrypoint.
    fn fake_tectonic(dir: &Path, script_body: &str) -> String {
        let path = dir.join("fake-tectonic");
        std::fs::write(
            &path,
            format!("#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then exit 0; fi\n{}\n", script_body),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn cache_with(tectonic_bin: String) -> CompileCache {
        let toolchain = Toolchain::new(
            ToolRunner::default(),
            tectonic_bin,
            "missing-pdflatex".to_string(),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        CompileCache::new(toolchain, 4000)
    }

    fn scaffold_project() -> (TempDir, ProjectLayout) {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("book.tex"), "\\documentclass{book}").unwrap();
        let project = ProjectLayout::open(tmp.path()).unwrap();
        (tmp, project)
    }

    #[tokio::test]
    async fn test_invalid_entrypoint_rejected() {
        let (_tmp, project) = scaffold_project();
        let cache = cache_with("missing".to_string());

        let result = cache.compile(&project, "book.docx").await;
        assert!(matches!(result, Err(CompileError::InvalidEntrypoint(_))));

        let result = cache.compile(&project, "missing.tex").await;
        assert!(matches!(result, Err(CompileError::EntrypointNotFound(_))));
    }

    #[tokio::test]
    async fn test_second_compile_is_cached_until_files_change() {
        let (tmp, project) = scaffold_project();
        let bins = TempDir::new().unwrap();
        let counter = tmp.path().join("invocations");
        let tectonic = fake_tectonic(
            bins.path(),
            &format!("echo run >> {}\necho pdf > \"$2\"/book.pdf", counter.display()),
        );
        let cache = cache_with(tectonic);

        let first = cache.compile(&project, "book.tex").await.unwrap();
        assert!(!first.cached);

        let second = cache.compile(&project, "book.tex").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.duration, Duration::ZERO);
        assert_eq!(second.artifact_path, first.artifact_path);
        assert_eq!(
            std::fs::read_to_string(&counter).unwrap().lines().count(),
            1,
            "cached call must not invoke the compiler"
        );

        // Changing a relevant file's size invalidates the cache.
        std::fs::write(tmp.path().join("book.tex"), "\\documentclass{book}%longer").unwrap();
        let third = cache.compile(&project, "book.tex").await.unwrap();
        assert!(!third.cached);
        assert_eq!(
            std::fs::read_to_string(&counter).unwrap().lines().count(),
            2
        );
    }

    #[tokio::test]
    async fn test_cache_invalid_when_artifact_deleted() {
        let (_tmp, project) = scaffold_project();
        let bins = TempDir::new().unwrap();
        let tectonic = fake_tectonic(bins.path(), "echo pdf > \"$2\"/book.pdf");
        let cache = cache_with(tectonic);

        let first = cache.compile(&project, "book.tex").await.unwrap();
        std::fs::remove_file(&first.artifact_path).unwrap();

        let second = cache.compile(&project, "book.tex").await.unwrap();
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_build() {
        let (tmp, project) = scaffold_project();
        let bins = TempDir::new().unwrap();
        let counter = tmp.path().join("invocations");
        let tectonic = fake_tectonic(
            bins.path(),
            &format!(
                "echo run >> {}\nsleep 0.3\necho pdf > \"$2\"/book.pdf",
                counter.display()
            ),
        );
        let cache = cache_with(tectonic);

        let (a, b) = tokio::join!(
            cache.compile(&project, "book.tex"),
            cache.compile(&project, "book.tex")
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(
            std::fs::read_to_string(&counter).unwrap().lines().count(),
            1,
            "concurrent compiles must share one subprocess"
        );
        assert_eq!(a.artifact_path, b.artifact_path);
        assert_eq!(a.generated_at, b.generated_at);
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact_is_an_error() {
        let (_tmp, project) = scaffold_project();
        let bins = TempDir::new().unwrap();
        let tectonic = fake_tectonic(bins.path(), "exit 0");
        let cache = cache_with(tectonic);

        let result = cache.compile(&project, "book.tex").await;
        assert!(matches!(result, Err(CompileError::ArtifactMissing(_))));
    }
}
