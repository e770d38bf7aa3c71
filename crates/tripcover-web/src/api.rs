//! REST API endpoint handlers.
//!
//! The chat surface: open/list/read sessions, send messages, upload
//! documents, patch extracted fields, poll payment, ingest policy
//! documents, and run a voice round trip. Bearer-token auth lives in the
//! external auth layer in front of these handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, warn};
use tripcover_rs::docs::DocumentBlob;
use tripcover_rs::orchestrator::Assistant;
use tripcover_rs::rag::DocumentMeta;
use tripcover_rs::session::UserProfile;
use tripcover_rs::Error;

use crate::snapshot::StateSnapshot;

/// Shared application state passed to all handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub webhook_secret: String,
}

/// Map core error kinds to HTTP statuses.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState { .. } | Error::QuoteExpired | Error::BindConflict { .. } => {
            StatusCode::CONFLICT
        }
        Error::InputTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::DownstreamUnavailable { .. }
        | Error::DownstreamRejected { .. }
        | Error::NoOffers => StatusCode::BAD_GATEWAY,
        Error::InternalTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::IntegrityViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> (StatusCode, Json<serde_json::Value>) {
    // Integrity violations are raised to operations via the log and never
    // surfaced to the end user.
    if let Error::IntegrityViolation(detail) = err {
        error!("integrity violation: {detail}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "internal_error" })),
        );
    }
    (
        status_for(err),
        Json(serde_json::json!({ "error": err.kind(), "detail": err.to_string() })),
    )
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

// ── Sessions ───────────────────────────────────────────────────────

/// Request body for POST /api/sessions. The external auth layer forwards
/// the authenticated user's profile.
#[derive(Deserialize)]
pub struct OpenSessionRequest {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// POST /api/sessions — open a new session.
pub async fn open_session(
    State(app): State<AppState>,
    Json(body): Json<OpenSessionRequest>,
) -> Json<serde_json::Value> {
    let session_id = app.assistant.open_session(UserProfile {
        user_id: body.user_id,
        first_name: body.first_name,
        last_name: body.last_name,
        email: body.email,
    });
    Json(serde_json::json!({ "session_id": session_id }))
}

/// GET /api/sessions — session listing.
pub async fn list_sessions(State(app): State<AppState>) -> Json<serde_json::Value> {
    let summaries = app.assistant.sessions().list(Utc::now()).await;
    Json(serde_json::json!({ "sessions": summaries }))
}

/// GET /api/sessions/{id} — message history plus state snapshot.
pub async fn get_session(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let handle = app
        .assistant
        .sessions()
        .get(&session_id)
        .map_err(|err| error_response(&err))?;
    let session = handle.lock().await;
    let snapshot = StateSnapshot::from_session(&session, Utc::now());
    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "messages": session.messages,
        "state_snapshot": snapshot,
        "terminal": session.terminal,
    })))
}

// ── Chat ───────────────────────────────────────────────────────────

/// Request body for POST /api/chat.
#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub session_id: String,
    pub message_text: String,
}

/// POST /api/chat — one conversation turn.
pub async fn send_message(
    State(app): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult {
    let outcome = app
        .assistant
        .handle_turn(&body.session_id, &body.message_text, None)
        .await
        .map_err(|err| error_response(&err))?;

    let now = Utc::now();
    let snapshot = turn_snapshot(&app, &body.session_id).await;
    let mut reply = serde_json::json!({
        "assistant_text": outcome.assistant_text,
        "state_snapshot": snapshot,
    });
    if let Some(quote) = outcome.quote {
        reply["quote"] = serde_json::json!({
            "tiers": quote.tiers,
            "recommended_tier": quote.recommended_tier,
            "expires_at": quote.expires_at,
            "valid_for_secs": (quote.expires_at - now).num_seconds().max(0),
        });
    }
    Ok(Json(reply))
}

/// POST /api/upload — multipart document upload, response mirrors chat
/// plus the extracted record.
pub async fn upload_document(
    State(app): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult {
    let mut session_id = None;
    let mut user_message = String::new();
    let mut blob: Option<DocumentBlob> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "session_id" => session_id = field.text().await.ok(),
            "user_message" => user_message = field.text().await.unwrap_or_default(),
            "file" => {
                let filename = field
                    .file_name()
                    .map(String::from)
                    .unwrap_or_else(|| "upload".to_string());
                match field.bytes().await {
                    Ok(bytes) => {
                        blob = Some(DocumentBlob {
                            filename,
                            bytes: bytes.to_vec(),
                        })
                    }
                    Err(err) => {
                        warn!("upload read failed: {err}");
                    }
                }
            }
            _ => {}
        }
    }

    let session_id = session_id.ok_or_else(|| {
        error_response(&Error::InvalidInput("session_id field required".into()))
    })?;
    if blob.is_none() {
        return Err(error_response(&Error::InvalidInput(
            "file field required".into(),
        )));
    }

    let outcome = app
        .assistant
        .handle_turn(&session_id, &user_message, blob)
        .await
        .map_err(|err| error_response(&err))?;

    let snapshot = turn_snapshot(&app, &session_id).await;
    Ok(Json(serde_json::json!({
        "assistant_text": outcome.assistant_text,
        "state_snapshot": snapshot,
        "extracted_data": outcome.extracted_data,
    })))
}

// ── Documents ──────────────────────────────────────────────────────

/// Request body for PATCH /api/documents/{id}.
#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    pub structured_fields: serde_json::Value,
}

/// PATCH /api/documents/{id} — apply user edits and re-bucket.
pub async fn update_document(
    State(app): State<AppState>,
    Path(document_id): Path<String>,
    Json(body): Json<UpdateDocumentRequest>,
) -> ApiResult {
    let updated = app
        .assistant
        .update_document(&document_id, &body.structured_fields)
        .await
        .map_err(|err| error_response(&err))?;
    Ok(Json(serde_json::json!({ "document": updated })))
}

// ── Payments ───────────────────────────────────────────────────────

/// GET /api/payment/{session_id} — the polling contract. Clients poll at
/// ≤ 1 Hz and stop once the status is final.
pub async fn poll_payment(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let status = app
        .assistant
        .purchase()
        .poll_payment(&session_id)
        .await
        .map_err(|err| error_response(&err))?;
    Ok(Json(serde_json::json!({
        "status": status,
        "stop_polling": status.is_final(),
    })))
}

// ── Products ───────────────────────────────────────────────────────

/// GET /api/products — the insurer's catalog for the configured market.
pub async fn list_products(State(app): State<AppState>) -> ApiResult {
    let products = app
        .assistant
        .list_products()
        .await
        .map_err(|err| error_response(&err))?;
    Ok(Json(serde_json::json!({ "products": products })))
}

// ── Corpus ─────────────────────────────────────────────────────────

/// Request body for POST /api/corpus.
#[derive(Deserialize)]
pub struct IngestRequest {
    pub title: String,
    pub insurer_name: String,
    pub product_code: String,
    pub content: String,
    #[serde(default)]
    pub split_by_sections: bool,
}

/// POST /api/corpus — ingest a policy document into the retrieval index.
pub async fn ingest_corpus(
    State(app): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> ApiResult {
    let meta = DocumentMeta {
        title: body.title,
        insurer_name: body.insurer_name,
        product_code: body.product_code,
    };
    let chunks = app
        .assistant
        .retriever()
        .ingest(&meta, &body.content, body.split_by_sections)
        .await
        .map_err(|err| error_response(&err))?;
    Ok(Json(serde_json::json!({ "chunks": chunks })))
}

// ── Voice ──────────────────────────────────────────────────────────

/// POST /api/voice — multipart audio round trip: transcribe, run the
/// turn, synthesize the reply.
pub async fn voice_turn(State(app): State<AppState>, mut multipart: Multipart) -> ApiResult {
    let mut session_id = None;
    let mut audio: Option<Vec<u8>> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "session_id" => session_id = field.text().await.ok(),
            "audio" => audio = field.bytes().await.ok().map(|b| b.to_vec()),
            _ => {}
        }
    }

    let session_id = session_id.ok_or_else(|| {
        error_response(&Error::InvalidInput("session_id field required".into()))
    })?;
    let audio = audio.ok_or_else(|| {
        error_response(&Error::InvalidInput("audio field required".into()))
    })?;

    let (outcome, transcript, audio_reply) = app
        .assistant
        .voice_turn(&session_id, &audio)
        .await
        .map_err(|err| error_response(&err))?;

    let snapshot = turn_snapshot(&app, &session_id).await;
    Ok(Json(serde_json::json!({
        "transcript": transcript,
        "assistant_text": outcome.assistant_text,
        "state_snapshot": snapshot,
        "audio_base64": base64::engine::general_purpose::STANDARD.encode(audio_reply),
    })))
}

// ── Helpers ────────────────────────────────────────────────────────

/// Post-turn snapshot including the derived dialogue state (the turn
/// outcome carries the state; the dialogue label needs the session).
async fn turn_snapshot(app: &AppState, session_id: &str) -> serde_json::Value {
    match app.assistant.sessions().get(session_id) {
        Ok(handle) => {
            let session = handle.lock().await;
            serde_json::to_value(StateSnapshot::from_session(&session, Utc::now()))
                .unwrap_or_default()
        }
        Err(_) => serde_json::Value::Null,
    }
}
