//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{self, AppState};
use crate::webhook;

/// Multipart uploads carry documents up to 10 MB plus form overhead.
const BODY_LIMIT_BYTES: usize = 12 * 1024 * 1024;

/// Build the full axum router.
///
/// The router serves the chat API under `/api/*` and the payment webhook
/// at `/webhooks/payment`. Bearer-token enforcement lives in the external
/// auth layer in front of this router.
pub fn build_router(state: AppState) -> Router {
    // CORS for browser clients served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions", post(api::open_session).get(api::list_sessions))
        .route("/api/sessions/{id}", get(api::get_session))
        .route("/api/chat", post(api::send_message))
        .route("/api/upload", post(api::upload_document))
        .route("/api/documents/{id}", patch(api::update_document))
        .route("/api/payment/{session_id}", get(api::poll_payment))
        .route("/api/products", get(api::list_products))
        .route("/api/corpus", post(api::ingest_corpus))
        .route("/api/voice", post(api::voice_turn))
        .route("/webhooks/payment", post(webhook::payment_webhook))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the axum server and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!("server exited: {err}");
        }
    });

    Ok(addr)
}
