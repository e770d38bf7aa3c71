//! HTTP chat surface for tripcover-rs powered assistants.
//!
//! `tripcover-web` exposes the assistant over REST: session management,
//! chat turns, document upload, extracted-field edits, payment polling,
//! the payment-processor webhook, policy-corpus ingestion, and a voice
//! round trip. It is designed to sit behind an auth proxy that enforces
//! bearer tokens and forwards the authenticated user's profile.
//!
//! # Quick start
//!
//! ```ignore
//! use tripcover_rs::{AppConfig, orchestrator::Assistant};
//! use tripcover_web::{WebConfig, spawn_web};
//! use std::sync::Arc;
//!
//! let config = AppConfig::from_env()?;
//! let webhook_secret = config.webhook_signing_secret.clone();
//! let assistant = Arc::new(Assistant::from_config(config)?);
//!
//! let addr = spawn_web(assistant, webhook_secret, WebConfig::default()).await?;
//! println!("chat API on http://{addr}");
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser/UI ──POST /api/chat──▶ Assistant::handle_turn ──▶ reply + snapshot
//! Payment processor ──POST /webhooks/payment──▶ verify HMAC ──▶ bind task
//! UIs without webhooks ──GET /api/payment/{id}──▶ poll checkout status
//! ```

pub mod api;
pub mod server;
pub mod snapshot;
pub mod webhook;

pub use api::AppState;
pub use snapshot::StateSnapshot;

use std::net::SocketAddr;
use std::sync::Arc;

use tripcover_rs::orchestrator::Assistant;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(
    assistant: Arc<Assistant>,
    webhook_secret: String,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    let state = AppState {
        assistant,
        webhook_secret,
    };
    let router = server::build_router(state);
    server::start_server(router, config.bind_addr).await
}
