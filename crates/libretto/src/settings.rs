//! Runtime settings for the orchestration core.
//!
//! The UI shell loads these from its own preferences store and hands them to
//! [`crate::app::App`] at startup. The transcription API key never round-trips
//! through serde; it is resolved separately (preference store or environment)
//! and injected via [`Settings::with_api_key`].

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Ceiling for audio uploads to the transcription service, in bytes.
/// Matches the remote service's own 25 MiB limit so oversized files are
/// rejected locally before any network traffic.
pub const DEFAULT_UPLOAD_CEILING_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether saved recordings are transcribed automatically.
    #[serde(default = "default_true")]
    pub auto_transcribe: bool,

    /// Model name sent to the transcription service.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Endpoint of the transcription service.
    #[serde(default = "default_transcription_endpoint")]
    pub transcription_endpoint: String,

    /// Maximum audio upload size in bytes.
    #[serde(default = "default_upload_ceiling")]
    pub upload_ceiling_bytes: u64,

    /// Compiler binary overrides (mostly for tests and exotic installs).
    #[serde(default = "default_tectonic_bin")]
    pub tectonic_bin: String,
    #[serde(default = "default_pdflatex_bin")]
    pub pdflatex_bin: String,

    /// Agent CLI binary used for drafting sessions.
    #[serde(default = "default_agent_bin")]
    pub agent_bin: String,

    /// Wall-clock timeout for a single compiler invocation, in seconds.
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// Timeout for cheap version/login probes, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL for timed-out tools, in
    /// milliseconds.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Maximum retained session log entries (oldest dropped beyond this).
    #[serde(default = "default_session_log_cap")]
    pub session_log_cap: usize,

    /// Maximum log entries returned per poll.
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,

    /// Bounded compiler log tail, in characters.
    #[serde(default = "default_log_tail_chars")]
    pub log_tail_chars: usize,

    /// Transcription API key. Never serialized; injected at startup.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

fn default_true() -> bool {
    true
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_transcription_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_upload_ceiling() -> u64 {
    DEFAULT_UPLOAD_CEILING_BYTES
}

fn default_tectonic_bin() -> String {
    "tectonic".to_string()
}

fn default_pdflatex_bin() -> String {
    "pdflatex".to_string()
}

fn default_agent_bin() -> String {
    "codex".to_string()
}

fn default_build_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_session_log_cap() -> usize {
    2000
}

fn default_poll_batch() -> usize {
    200
}

fn default_log_tail_chars() -> usize {
    4000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_transcribe: true,
            transcription_model: default_transcription_model(),
            transcription_endpoint: default_transcription_endpoint(),
            upload_ceiling_bytes: DEFAULT_UPLOAD_CEILING_BYTES,
            tectonic_bin: default_tectonic_bin(),
            pdflatex_bin: default_pdflatex_bin(),
            agent_bin: default_agent_bin(),
            build_timeout_secs: default_build_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            session_log_cap: default_session_log_cap(),
            poll_batch: default_poll_batch(),
            log_tail_chars: default_log_tail_chars(),
            api_key: None,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file, falling back to defaults for any
    /// missing field.
    pub fn load(path: &PathBuf) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Injects the transcription API key resolved by the caller.
    pub fn with_api_key(mut self, key: Option<SecretString>) -> Self {
        self.api_key = key;
        self
    }

    /// True when both an API key and the auto-transcribe preference are
    /// present, i.e. enqueueing a transcription job is allowed.
    pub fn transcription_enabled(&self) -> bool {
        self.auto_transcribe && self.api_key.is_some()
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.auto_transcribe);
        assert_eq!(settings.upload_ceiling_bytes, 25 * 1024 * 1024);
        assert_eq!(settings.tectonic_bin, "tectonic");
        assert_eq!(settings.pdflatex_bin, "pdflatex");
        assert!(settings.api_key.is_none());
        assert!(!settings.transcription_enabled());
    }

    #[test]
    fn test_transcription_enabled_requires_both() {
        let mut settings =
            Settings::default().with_api_key(Some(SecretString::from("sk-test".to_string())));
        assert!(settings.transcription_enabled());

        settings.auto_transcribe = false;
        assert!(!settings.transcription_enabled());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let parsed: Settings = serde_json::from_str(r#"{"auto_transcribe": false}"#).unwrap();
        assert!(!parsed.auto_transcribe);
        assert_eq!(parsed.transcription_model, "whisper-1");
    }
}
