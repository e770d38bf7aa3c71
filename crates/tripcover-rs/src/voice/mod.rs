//! Voice round-trip: speech-to-text in, text-to-speech out, transcript
//! persistence.
//!
//! Hard limits: audio uploads ≤ 5 MB, synthesis text ≤ 5,000 characters.
//! Oversized inputs are rejected with `InputTooLarge` before any backend
//! call.

use crate::{BoxFut, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// A completed transcription.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub duration_seconds: f64,
    pub language: String,
}

/// One voice exchange, appended per round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTranscript {
    pub session_id: String,
    pub user_audio_transcript: String,
    pub ai_response_text: String,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Speech backend seam (transcription + synthesis).
pub trait SpeechBackend: Send + Sync {
    fn transcribe<'a>(&'a self, audio: &'a [u8]) -> BoxFut<'a, Result<Transcription>>;
    fn synthesize<'a>(&'a self, text: &'a str, voice_id: &'a str) -> BoxFut<'a, Result<Vec<u8>>>;
}

/// Reqwest-backed speech client (`/audio/transcriptions`, `/audio/speech`).
pub struct SpeechClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SpeechClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tripcover/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::DownstreamUnavailable {
                service: "speech",
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn unavailable(detail: String) -> Error {
        Error::DownstreamUnavailable {
            service: "speech",
            detail,
        }
    }
}

impl SpeechBackend for SpeechClient {
    fn transcribe<'a>(&'a self, audio: &'a [u8]) -> BoxFut<'a, Result<Transcription>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/audio/transcriptions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/octet-stream")
                .body(audio.to_vec())
                .send()
                .await
                .map_err(|e| Self::unavailable(format!("request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Self::unavailable(format!("HTTP {status}")));
            }
            resp.json()
                .await
                .map_err(|e| Error::Parse(format!("transcription response: {e}")))
        })
    }

    fn synthesize<'a>(&'a self, text: &'a str, voice_id: &'a str) -> BoxFut<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let body = serde_json::json!({ "input": text, "voice": voice_id });
            let resp = self
                .http
                .post(format!("{}/audio/speech", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| Self::unavailable(format!("request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Self::unavailable(format!("HTTP {status}")));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| Self::unavailable(format!("failed to read audio: {e}")))?;
            Ok(bytes.to_vec())
        })
    }
}

/// Voice service: limit enforcement plus the append-only transcript log.
pub struct VoiceService {
    backend: std::sync::Arc<dyn SpeechBackend>,
    audio_max_bytes: usize,
    tts_max_chars: usize,
    default_voice_id: String,
    transcripts: RwLock<Vec<VoiceTranscript>>,
}

impl VoiceService {
    pub fn new(
        backend: std::sync::Arc<dyn SpeechBackend>,
        audio_max_bytes: usize,
        tts_max_chars: usize,
        default_voice_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            audio_max_bytes,
            tts_max_chars,
            default_voice_id: default_voice_id.into(),
            transcripts: RwLock::new(Vec::new()),
        }
    }

    /// Transcribe an audio blob. Rejects blobs over the size limit.
    pub async fn transcribe(&self, audio: &[u8]) -> Result<Transcription> {
        if audio.len() > self.audio_max_bytes {
            return Err(Error::InputTooLarge {
                what: "audio",
                limit: self.audio_max_bytes,
                actual: audio.len(),
            });
        }
        let transcription = self.backend.transcribe(audio).await?;
        debug!(
            "transcribed {:.1}s of audio ({} chars, {})",
            transcription.duration_seconds,
            transcription.text.len(),
            transcription.language
        );
        Ok(transcription)
    }

    /// Synthesize speech. Rejects text over the character limit.
    pub async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<Vec<u8>> {
        let chars = text.chars().count();
        if chars > self.tts_max_chars {
            return Err(Error::InputTooLarge {
                what: "synthesis text",
                limit: self.tts_max_chars,
                actual: chars,
            });
        }
        let voice = voice_id.unwrap_or(&self.default_voice_id);
        self.backend.synthesize(text, voice).await
    }

    /// Append a voice transcript record.
    pub fn save_transcript(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        duration_seconds: f64,
        now: DateTime<Utc>,
    ) {
        if let Ok(mut transcripts) = self.transcripts.write() {
            transcripts.push(VoiceTranscript {
                session_id: session_id.to_string(),
                user_audio_transcript: user_text.to_string(),
                ai_response_text: assistant_text.to_string(),
                duration_seconds,
                created_at: now,
            });
        }
    }

    /// Transcripts for one session, in append order.
    pub fn transcripts_for(&self, session_id: &str) -> Vec<VoiceTranscript> {
        self.transcripts
            .read()
            .map(|transcripts| {
                transcripts
                    .iter()
                    .filter(|t| t.session_id == session_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
