//! Conversational travel-insurance assistant core.
//!
//! `tripcover-rs` implements the full quote-to-policy conversation engine:
//! a per-session dialogue state machine that classifies intent, fills trip
//! and traveler slots across turns, merges facts extracted from uploaded
//! documents, prices a three-tier quote through the insurer API, drives
//! payment checkout, and binds the policy once payment is confirmed. A
//! policy-document retrieval index answers coverage and claims questions
//! with citations.
//!
//! The central type is the [`Assistant`](orchestrator::Assistant) — one
//! [`handle_turn`](orchestrator::Assistant::handle_turn) call per user
//! message, processed under a per-session lock so turns are linearizable
//! within a session and fully concurrent across sessions.
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Drive a conversation:** see [`Assistant`](orchestrator::Assistant)
//!   and [`TurnOutcome`](orchestrator::TurnOutcome). Sessions live in the
//!   [`SessionStore`](session::SessionStore); dialogue state is a derived
//!   view ([`DialogueState`](session::DialogueState)), never stored.
//! - **Extract trip facts from free text:** see
//!   [`SlotExtractor`](slots::SlotExtractor) and the normalization rules in
//!   [`slots::normalize`].
//! - **Turn an uploaded PDF into structured facts:** see
//!   [`DocumentPipeline`](docs::DocumentPipeline) — OCR, type detection,
//!   typed extraction, and confidence bucketing.
//! - **Price and bind:** see [`PricingService`](pricing::PricingService)
//!   for tier derivation, [`InsurerClient`](insurer::InsurerClient) for the
//!   wire protocol, and
//!   [`PurchaseCoordinator`](purchase::PurchaseCoordinator) for the
//!   checkout → webhook → bind handoff.
//! - **Answer coverage questions:** see [`Retriever`](rag::Retriever) for
//!   chunking, embedding, and cosine search with citation locators.
//!
//! # Design principles
//!
//! 1. **Typed facts only.** Every LLM output that feeds state is strict
//!    JSON validated against a schema; parse failures become empty patches,
//!    never state writes.
//! 2. **Confidence is first-class.** Document fields carry scalar
//!    confidences and land in high/low/missing buckets that drive different
//!    conversation behavior.
//! 3. **The store enforces idempotency.** At most one policy per payment
//!    reference, guaranteed by a uniqueness constraint, not by callers
//!    being careful.
//! 4. **Coarse per-session locks.** Turns and payment events serialize on
//!    one mutex per session; state is small and user-perceived turns are
//!    serial anyway.

pub mod config;
pub mod docs;
pub mod error;
pub mod insurer;
pub mod orchestrator;
pub mod pricing;
pub mod purchase;
pub mod rag;
pub mod session;
pub mod slots;
pub mod voice;

pub use config::AppConfig;
pub use error::{Error, Result};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

/// Default chat-completions endpoint base.
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default embeddings endpoint base.
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for all conversational LLM calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Maximum tokens for lightweight classification/extraction calls.
pub const PREPROCESSING_MAX_TOKENS: u32 = 1024;

// ── Futures ────────────────────────────────────────────────────────

/// Boxed future used by the external-collaborator traits (LLM, OCR,
/// embeddings, insurer, payment, speech).
///
/// Type alias to keep trait signatures dyn-compatible and readable.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between the strongly-typed
/// extraction structs and the schema text embedded in LLM prompts (and the
/// validator run over LLM replies).
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Chat wire types ────────────────────────────────────────────────

/// Role of a message sent to the chat-completions API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a chat-completions request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// JSON output mode.
#[derive(Serialize, Debug, Clone)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: String,
}

impl ResponseFormat {
    /// Force the model to emit a single JSON object.
    pub fn json_object() -> Self {
        Self {
            fmt_type: "json_object".to_string(),
        }
    }
}

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Clean return type from [`LlmClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
}

// ── LLM backend seam ───────────────────────────────────────────────

/// Chat-completions backend.
///
/// The orchestrator, slot extractor, and document pipeline all talk to the
/// LLM through this seam so tests can supply deterministic fakes.
pub trait LlmBackend: Send + Sync {
    /// Send a chat request and return the assistant text.
    fn complete(&self, request: ChatRequest) -> BoxFut<'_, Result<String>>;
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for a chat-completions API.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// Create a new client with the given API key and base URL.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tripcover/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::DownstreamUnavailable {
                service: "llm",
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::DownstreamUnavailable {
                service: "llm",
                detail: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::DownstreamUnavailable {
                service: "llm",
                detail: format!("failed to read response: {e}"),
            })?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if status.is_server_error() {
            return Err(Error::DownstreamUnavailable {
                service: "llm",
                detail: format!("HTTP {status}: {text}"),
            });
        }
        if !status.is_success() {
            return Err(Error::DownstreamRejected {
                service: "llm",
                detail: format!("HTTP {status}: {text}"),
            });
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| Error::Parse(format!("LLM response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(Error::DownstreamRejected {
                service: "llm",
                detail: err.message,
            });
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);

        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

impl LlmBackend for LlmClient {
    fn complete(&self, request: ChatRequest) -> BoxFut<'_, Result<String>> {
        Box::pin(async move {
            let completion = self.chat(&request).await?;
            completion
                .content
                .ok_or_else(|| Error::Parse("empty LLM response".to_string()))
        })
    }
}

// ── Strict-JSON completion ─────────────────────────────────────────

/// Run a one-shot completion whose reply must be a JSON object matching
/// `T`'s schema.
///
/// The reply is parsed, validated against the `schemars`-generated schema,
/// and deserialized. Any failure is [`Error::Parse`]; extraction callers
/// map that to an empty patch so free-form LLM output never reaches state.
pub async fn complete_json<T: JsonSchema + DeserializeOwned>(
    backend: &dyn LlmBackend,
    model: &str,
    system: &str,
    user: &str,
) -> Result<T> {
    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        max_tokens: PREPROCESSING_MAX_TOKENS,
        temperature: 0.1,
        response_format: Some(ResponseFormat::json_object()),
    };

    let reply = backend.complete(request).await?;
    parse_validated_json(&reply)
}

/// Parse a string as JSON, validate it against `T`'s schema, and
/// deserialize. Tolerates a Markdown code fence around the object.
pub fn parse_validated_json<T: JsonSchema + DeserializeOwned>(reply: &str) -> Result<T> {
    let trimmed = strip_code_fence(reply);
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| Error::Parse(format!("not JSON: {e}")))?;

    let schema = json_schema_for::<T>();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::Parse(format!("schema compile failed: {e}")))?;
    if let Some(first) = validator.iter_errors(&value).next() {
        return Err(Error::Parse(format!(
            "schema violation at {}: {first}",
            first.instance_path()
        )));
    }

    serde_json::from_value(value).map_err(|e| Error::Parse(format!("deserialize failed: {e}")))
}

/// Strip a leading/trailing Markdown code fence if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
