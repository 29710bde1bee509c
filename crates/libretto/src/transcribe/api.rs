//! Remote speech-to-text service client.

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::JobError;

/// Abstract transcription collaborator. The production implementation talks
/// to a Whisper-style HTTP endpoint; tests substitute a scripted mock.
#[async_trait]
pub trait TranscriptionApi: Send + Sync {
    /// Uploads the audio file and returns the transcribed text.
    async fn transcribe(&self, audio_path: &Path) -> Result<String, JobError>;
}

/// Whisper-style `POST multipart(audio, model, [prompt], [language]) -> text`
/// client. Size enforcement happens in the worker before this is called.
pub struct WhisperClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    prompt: Option<String>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl WhisperClient {
    pub fn new(endpoint: String, model: String, api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
            prompt: None,
            language: None,
        }
    }

    /// Optional decoding hints forwarded to the service.
    pub fn with_hints(mut self, prompt: Option<String>, language: Option<String>) -> Self {
        self.prompt = prompt;
        self.language = language;
        self
    }
}

#[async_trait]
impl TranscriptionApi for WhisperClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, JobError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|source| JobError::ReadAudio {
                path: audio_path.to_path_buf(),
                source,
            })?;

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let mime = mime_guess::from_path(audio_path)
            .first_or_octet_stream()
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|e| JobError::Api(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(prompt) = &self.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| JobError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Prefer the service's own error message when it sends one.
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(JobError::Api(format!("{}: {}", status, message.trim())));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| JobError::Api(format!("Unparseable response: {}", e)))?;
        Ok(parsed.text)
    }
}
