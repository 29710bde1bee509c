//! Compiler selection and invocation.
//!
//! Tectonic is preferred: a single self-contained pass. pdflatex is the
//! fallback and needs two sequential passes so cross-references resolve.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::tool::ToolRunner;

use super::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    Tectonic,
    Pdflatex,
}

impl std::fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilerKind::Tectonic => write!(f, "tectonic"),
            CompilerKind::Pdflatex => write!(f, "pdflatex"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    runner: ToolRunner,
    tectonic_bin: String,
    pdflatex_bin: String,
    probe_timeout: Duration,
    build_timeout: Duration,
}

impl Toolchain {
    pub fn new(
        runner: ToolRunner,
        tectonic_bin: String,
        pdflatex_bin: String,
        probe_timeout: Duration,
        build_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            tectonic_bin,
            pdflatex_bin,
            probe_timeout,
            build_timeout,
        }
    }

    /// Probes for an available compiler, preferred kind first.
    pub async fn detect(&self, working_dir: &Path) -> Result<CompilerKind, CompileError> {
        if self.probe(&self.tectonic_bin, working_dir).await {
            return Ok(CompilerKind::Tectonic);
        }
        if self.probe(&self.pdflatex_bin, working_dir).await {
            return Ok(CompilerKind::Pdflatex);
        }
        Err(CompileError::NoCompilerFound)
    }

    async fn probe(&self, binary: &str, working_dir: &Path) -> bool {
        match self
            .runner
            .run(binary, &["--version"], working_dir, self.probe_timeout)
            .await
        {
            Ok(output) if output.success() => {
                debug!(
                    "Compiler probe ok: {} ({})",
                    binary,
                    output.stdout.lines().next().unwrap_or("").trim()
                );
                true
            }
            Ok(output) => {
                debug!(
                    "Compiler probe failed for {}: exit {:?}",
                    binary, output.exit_code
                );
                false
            }
            Err(e) => {
                debug!("Compiler probe failed for {}: {}", binary, e);
                false
            }
        }
    }

    /// Runs the selected compiler against `entrypoint`, writing into
    /// `build_dir`. Returns the combined compiler output on success.
    pub async fn build(
        &self,
        kind: CompilerKind,
        project_root: &Path,
        entrypoint: &str,
        build_dir: &Path,
    ) -> Result<String, CompileError> {
        let build_dir_arg = build_dir.to_string_lossy().to_string();
        let passes: usize = match kind {
            CompilerKind::Tectonic => 1,
            CompilerKind::Pdflatex => 2,
        };

        let mut combined = String::new();
        for pass in 1..=passes {
            info!(
                "Compiling {} with {} (pass {}/{})",
                entrypoint, kind, pass, passes
            );

            let output = match kind {
                CompilerKind::Tectonic => {
                    self.runner
                        .run(
                            &self.tectonic_bin,
                            &["--outdir", &build_dir_arg, "--chatter", "minimal", entrypoint],
                            project_root,
                            self.build_timeout,
                        )
                        .await
                }
                CompilerKind::Pdflatex => {
                    let outdir_flag = format!("-output-directory={}", build_dir_arg);
                    self.runner
                        .run(
                            &self.pdflatex_bin,
                            &[
                                "-interaction=nonstopmode",
                                "-halt-on-error",
                                &outdir_flag,
                                entrypoint,
                            ],
                            project_root,
                            self.build_timeout,
                        )
                        .await
                }
            }
            .map_err(|e| CompileError::Tool(e.to_string()))?;

            combined.push_str(&output.stdout);
            combined.push_str(&output.stderr);

            if !output.success() {
                let reason = if output.timed_out {
                    format!("\n[{} timed out and was terminated]", kind)
                } else {
                    format!("\n[{} exited with {:?}]", kind, output.exit_code)
                };
                combined.push_str(&reason);
                return Err(CompileError::CompileFailed {
                    compiler: kind,
                    log_tail: combined,
                });
            }
        }

        Ok(combined)
    }

    /// Expected artifact location for a given entrypoint.
    pub fn artifact_path(build_dir: &Path, entrypoint: &str) -> PathBuf {
        let stem = Path::new(entrypoint)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| entrypoint.to_string());
        build_dir.join(format!("{}.pdf", stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_uses_entry_stem() {
        let build = Path::new("/p/build");
        assert_eq!(
            Toolchain::artifact_path(build, "book.tex"),
            PathBuf::from("/p/build/book.pdf")
        );
        assert_eq!(
            Toolchain::artifact_path(build, "drafts/novel.tex"),
            PathBuf::from("/p/build/novel.pdf")
        );
    }

    #[cfg(unix)]
    mod with_fake_binaries {
        use super::*;
        use crate::tool::ToolRunner;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_bin(dir: &Path, name: &str, script: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn toolchain(tectonic: String, pdflatex: String) -> Toolchain {
            Toolchain::new(
                ToolRunner::default(),
                tectonic,
                pdflatex,
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
        }

        #[tokio::test]
        async fn test_detect_prefers_tectonic() {
            let tmp = TempDir::new().unwrap();
            let tectonic = fake_bin(tmp.path(), "tectonic", "exit 0");
            let pdflatex = fake_bin(tmp.path(), "pdflatex", "exit 0");

            let kind = toolchain(tectonic, pdflatex)
                .detect(tmp.path())
                .await
                .unwrap();
            assert_eq!(kind, CompilerKind::Tectonic);
        }

        #[tokio::test]
        async fn test_detect_falls_back_to_pdflatex() {
            let tmp = TempDir::new().unwrap();
            let pdflatex = fake_bin(tmp.path(), "pdflatex", "exit 0");

            let kind = toolchain("missing-tectonic-bin".to_string(), pdflatex)
                .detect(tmp.path())
                .await
                .unwrap();
            assert_eq!(kind, CompilerKind::Pdflatex);
        }

        #[tokio::test]
        async fn test_detect_fails_without_any_compiler() {
            let tmp = TempDir::new().unwrap();
            let result = toolchain("missing-a".to_string(), "missing-b".to_string())
                .detect(tmp.path())
                .await;
            assert!(matches!(result, Err(CompileError::NoCompilerFound)));
        }

        #[tokio::test]
        async fn test_pdflatex_runs_two_passes() {
            let tmp = TempDir::new().unwrap();
            let counter = tmp.path().join("passes");
            let pdflatex = fake_bin(
                tmp.path(),
                "pdflatex",
                &format!("echo pass >> {}", counter.display()),
            );

            toolchain("missing".to_string(), pdflatex)
                .build(CompilerKind::Pdflatex, tmp.path(), "book.tex", tmp.path())
                .await
                .unwrap();

            let recorded = std::fs::read_to_string(&counter).unwrap();
            assert_eq!(recorded.lines().count(), 2);
        }

        #[tokio::test]
        async fn test_build_failure_carries_log() {
            let tmp = TempDir::new().unwrap();
            let tectonic = fake_bin(tmp.path(), "tectonic", "echo '! Undefined control sequence'; exit 1");

            let result = toolchain(tectonic, "missing".to_string())
                .build(CompilerKind::Tectonic, tmp.path(), "book.tex", tmp.path())
                .await;

            match result {
                Err(CompileError::CompileFailed { log_tail, .. }) => {
                    assert!(log_tail.contains("Undefined control sequence"));
                }
                other => panic!("expected CompileFailed, got {:?}", other),
            }
        }
    }
}
