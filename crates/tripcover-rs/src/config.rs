//! Process-wide configuration with sensible defaults.
//!
//! [`AppConfig`] captures every external key and tunable the assistant needs.
//! Secrets come from environment variables via [`AppConfig::from_env`];
//! the numeric limits have documented defaults and are overridable the same
//! way.

use std::path::PathBuf;

/// Configuration for an assistant process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// LLM provider API key (`TRIPCOVER_LLM_KEY`).
    pub llm_api_key: String,
    /// Chat-completions base URL. Default: the OpenRouter endpoint.
    pub llm_base_url: String,
    /// Model identifier for conversational calls.
    pub llm_model: String,
    /// Embedding provider API key (`TRIPCOVER_EMBEDDING_KEY`).
    pub embedding_api_key: String,
    /// Embeddings base URL.
    pub embedding_base_url: String,
    /// Embedding model identifier. Default: `"text-embedding-3-small"`.
    pub embedding_model: String,
    /// OCR engine binary path (`TRIPCOVER_OCR_BIN`).
    pub ocr_binary: PathBuf,
    /// Insurer API key (`TRIPCOVER_INSURER_KEY`).
    pub insurer_api_key: String,
    /// Insurer base URL (`TRIPCOVER_INSURER_URL`).
    pub insurer_base_url: String,
    /// Payment processor base URL (`TRIPCOVER_PAYMENT_URL`).
    pub payment_base_url: String,
    /// Payment processor secret (`TRIPCOVER_PAYMENT_SECRET`).
    pub payment_secret: String,
    /// Webhook signing secret (`TRIPCOVER_WEBHOOK_SECRET`).
    pub webhook_signing_secret: String,
    /// Default text-to-speech voice id. Default: `"alloy"`.
    pub default_voice_id: String,
    /// BCP-47 language code sent to the insurer. Default: `"en"`.
    pub language_code: String,
    /// Insurer market code. Default: `"SG"`.
    pub market: String,

    // ── Limits ──
    /// Maximum trip duration in days. Default: `182`.
    pub trip_duration_max_days: i64,
    /// Quote time-to-live in hours. Default: `24`.
    pub quote_ttl_hours: i64,
    /// Retry budget for idempotent downstream calls. Default: `3`.
    pub retry_max_attempts: u32,
    /// Maximum audio upload size in megabytes. Default: `5`.
    pub audio_max_mb: usize,
    /// Maximum text-to-speech input length in characters. Default: `5000`.
    pub tts_max_chars: usize,
    /// Maximum document upload size in megabytes. Default: `10`.
    pub document_max_mb: usize,
    /// Per-turn wall-clock budget in seconds. Default: `30`.
    pub turn_deadline_secs: u64,
    /// Bounded worker permits for OCR/LLM/embedding jobs. Default: `8`.
    pub worker_permits: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_base_url: crate::DEFAULT_LLM_BASE_URL.to_string(),
            llm_model: crate::DEFAULT_MODEL.to_string(),
            embedding_api_key: String::new(),
            embedding_base_url: crate::DEFAULT_EMBEDDING_BASE_URL.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            payment_base_url: String::new(),
            ocr_binary: PathBuf::from("tesseract"),
            insurer_api_key: String::new(),
            insurer_base_url: String::new(),
            payment_secret: String::new(),
            webhook_signing_secret: String::new(),
            default_voice_id: "alloy".to_string(),
            language_code: "en".to_string(),
            market: "SG".to_string(),
            trip_duration_max_days: 182,
            quote_ttl_hours: 24,
            retry_max_attempts: 3,
            audio_max_mb: 5,
            tts_max_chars: 5000,
            document_max_mb: 10,
            turn_deadline_secs: 30,
            worker_permits: 8,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `TRIPCOVER_LLM_KEY`, `TRIPCOVER_EMBEDDING_KEY`,
    /// `TRIPCOVER_INSURER_KEY`, `TRIPCOVER_INSURER_URL`,
    /// `TRIPCOVER_PAYMENT_SECRET`, `TRIPCOVER_WEBHOOK_SECRET`.
    /// Everything else falls back to the documented default.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self {
            llm_api_key: require("TRIPCOVER_LLM_KEY")?,
            embedding_api_key: require("TRIPCOVER_EMBEDDING_KEY")?,
            insurer_api_key: require("TRIPCOVER_INSURER_KEY")?,
            insurer_base_url: require("TRIPCOVER_INSURER_URL")?,
            payment_secret: require("TRIPCOVER_PAYMENT_SECRET")?,
            webhook_signing_secret: require("TRIPCOVER_WEBHOOK_SECRET")?,
            ..Self::default()
        };

        if let Ok(url) = std::env::var("TRIPCOVER_LLM_URL") {
            config.llm_base_url = url;
        }
        if let Ok(model) = std::env::var("TRIPCOVER_LLM_MODEL") {
            config.llm_model = model;
        }
        if let Ok(url) = std::env::var("TRIPCOVER_EMBEDDING_URL") {
            config.embedding_base_url = url;
        }
        if let Ok(model) = std::env::var("TRIPCOVER_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(url) = std::env::var("TRIPCOVER_PAYMENT_URL") {
            config.payment_base_url = url;
        }
        if let Ok(bin) = std::env::var("TRIPCOVER_OCR_BIN") {
            config.ocr_binary = PathBuf::from(bin);
        }
        if let Ok(voice) = std::env::var("TRIPCOVER_VOICE_ID") {
            config.default_voice_id = voice;
        }
        if let Ok(lang) = std::env::var("TRIPCOVER_LANGUAGE") {
            config.language_code = lang;
        }
        if let Ok(market) = std::env::var("TRIPCOVER_MARKET") {
            config.market = market;
        }

        Ok(config)
    }

    /// Maximum audio upload size in bytes.
    pub fn audio_max_bytes(&self) -> usize {
        self.audio_max_mb * 1024 * 1024
    }

    /// Maximum document upload size in bytes.
    pub fn document_max_bytes(&self) -> usize {
        self.document_max_mb * 1024 * 1024
    }
}

fn require(key: &'static str) -> crate::Result<String> {
    std::env::var(key)
        .map_err(|_| crate::Error::InvalidInput(format!("missing required environment key {key}")))
}
