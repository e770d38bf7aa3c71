//! Payment-processor webhook.
//!
//! Delivers `{payment_ref, event}` envelopes signed with HMAC-SHA256 over
//! the raw body (hex digest in the `X-Signature` header). Unsigned or
//! invalid-signature deliveries are discarded with a log line. The handler
//! always acknowledges receipt — bind work is deferred to a background
//! task so the processor never sees our downstream latency or failures.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};
use tripcover_rs::purchase::PaymentEvent;

use crate::api::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 digest of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// One payment-event attempt must finish within this deadline (lock wait
/// included); expiry emits a warning and the event is retried
/// asynchronously.
const EVENT_DEADLINE: Duration = Duration::from_secs(60);

/// Asynchronous retries after watchdog expiry. Events are idempotent on
/// `payment_ref`, so a retried attempt is safe.
const EVENT_RETRY_ATTEMPTS: u32 = 3;

/// Compute the hex signature for a payload. Exposed for tests and
/// operational tooling.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time-ish comparison via HMAC verify.
fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// POST /webhooks/payment.
///
/// Returns 200 for every well-formed delivery, including discarded ones —
/// webhook handlers never raise to the payment processor.
pub async fn payment_webhook(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("payment webhook discarded: missing signature");
        return StatusCode::OK;
    };
    if !verify(&app.webhook_secret, &body, signature) {
        warn!("payment webhook discarded: invalid signature");
        return StatusCode::OK;
    }

    let event: PaymentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!("payment webhook discarded: malformed body: {err}");
            return StatusCode::OK;
        }
    };

    info!(
        "payment webhook accepted: {} {:?}",
        event.payment_ref, event.event
    );

    // Acknowledge immediately; the bind (with its retries) runs behind
    // the per-session lock on its own task, under the 60 s watchdog.
    let assistant = app.assistant.clone();
    tokio::spawn(async move {
        for attempt in 1..=EVENT_RETRY_ATTEMPTS {
            match tokio::time::timeout(
                EVENT_DEADLINE,
                assistant.purchase().on_payment_event(&event, Utc::now()),
            )
            .await
            {
                Ok(Ok(())) => return,
                Ok(Err(err)) => {
                    warn!("payment event processing failed: {err}");
                    return;
                }
                Err(_) => warn!(
                    "payment event {} exceeded {}s deadline (attempt {attempt}/{EVENT_RETRY_ATTEMPTS}); retrying asynchronously",
                    event.payment_ref,
                    EVENT_DEADLINE.as_secs()
                ),
            }
        }
        warn!(
            "payment event {} abandoned after {EVENT_RETRY_ATTEMPTS} watchdog expiries",
            event.payment_ref
        );
    });

    StatusCode::OK
}
