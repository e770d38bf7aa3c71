//! Integration tests for the tripcover web server.
//!
//! These tests start a real axum server on a random port with fully faked
//! backends and exercise the REST endpoints end to end: chat, upload,
//! webhook-driven bind, polling, and corpus ingest.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use std::str::FromStr;
use tripcover_rs::docs::DocumentBlob;
use tripcover_rs::docs::ocr::{OcrPage, OcrResult};
use tripcover_rs::insurer::types::{BoundPolicy, PricedOffer, PricedQuote, PriceFirmRequest};
use tripcover_rs::insurer::{BindRequest, ClaimChecklist, InsurerApi, Product};
use tripcover_rs::orchestrator::{Assistant, Backends};
use tripcover_rs::purchase::{CheckoutHandle, PaymentGateway};
use tripcover_rs::voice::Transcription;
use tripcover_rs::{AppConfig, BoxFut, ChatRequest, ChatRole, Error, LlmBackend, Result};
use tripcover_web::{WebConfig, spawn_web, webhook};

const WEBHOOK_SECRET: &str = "whsec-test";

// ── Fakes ──────────────────────────────────────────────────────────

struct RouterLlm;

impl LlmBackend for RouterLlm {
    fn complete(&self, request: ChatRequest) -> BoxFut<'_, Result<String>> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let reply = if system.contains("classify the user's intent") {
            r#"{"intent": "quote", "confidence": 0.95}"#.to_string()
        } else if system.contains("extract travel-insurance facts") {
            serde_json::json!({
                "destinations": {"value": ["Thailand"], "confidence": 0.95},
                "departure_date": {"value": "2030-11-16", "confidence": 0.95},
                "return_date": {"value": "2030-11-23", "confidence": 0.95},
                "travelers_count": {"value": 1, "confidence": 0.97},
                "traveler_ages": {"value": [32], "confidence": 0.97},
                "adventure_sports": {"value": false, "confidence": 0.9}
            })
            .to_string()
        } else if system.contains("classify travel documents") {
            r#"{"document_type": "flight_confirmation", "confidence": 0.95}"#.to_string()
        } else if system.contains("extract structured data") {
            serde_json::json!({
                "fields": {
                    "destination": {"country": "Japan", "city": "Tokyo"},
                    "departure": {"date": "2030-12-15"},
                    "travelers": [{"first_name": "Yuki", "last_name": "Tanaka"}]
                },
                "confidences": {
                    "destination.country": 0.97,
                    "departure.date": 0.95,
                    "travelers": 0.98
                }
            })
            .to_string()
        } else {
            "Happy to help!".to_string()
        };
        Box::pin(async move { Ok(reply) })
    }
}

struct FakeOcr;

impl tripcover_rs::docs::OcrEngine for FakeOcr {
    fn recognize<'a>(&'a self, _blob: &'a DocumentBlob) -> BoxFut<'a, Result<OcrResult>> {
        Box::pin(async {
            Ok(OcrResult {
                pages: vec![OcrPage {
                    text: "FLIGHT CONFIRMATION".into(),
                    confidence: 0.93,
                }],
            })
        })
    }
}

struct FakeInsurer;

impl InsurerApi for FakeInsurer {
    fn list_products<'a>(&'a self, _market: &'a str) -> BoxFut<'a, Result<Vec<Product>>> {
        Box::pin(async { Ok(vec![]) })
    }

    fn price_firm<'a>(&'a self, _request: &'a PriceFirmRequest) -> BoxFut<'a, Result<PricedQuote>> {
        Box::pin(async {
            Ok(PricedQuote {
                quote_id: "q-web".into(),
                offers: vec![PricedOffer {
                    offer_id: "off-web".into(),
                    product_code: "TRV".into(),
                    product_type: "TRAVEL".into(),
                    unit_price: Decimal::from_str("51.21").unwrap(),
                    currency: "SGD".into(),
                    coverage_details: serde_json::Value::Null,
                    raw_offer: serde_json::Value::Null,
                }],
                raw_response: serde_json::Value::Null,
            })
        })
    }

    fn bind<'a>(&'a self, _request: &'a BindRequest) -> BoxFut<'a, Result<BoundPolicy>> {
        Box::pin(async {
            Ok(BoundPolicy {
                policy_id: "pol-web".into(),
                coverage_snapshot: serde_json::Value::Null,
            })
        })
    }

    fn claim_requirements<'a>(&'a self, claim_type: &'a str) -> BoxFut<'a, Result<ClaimChecklist>> {
        let claim_type = claim_type.to_string();
        Box::pin(async move {
            Ok(ClaimChecklist {
                claim_type,
                required_documents: vec!["receipts".into()],
            })
        })
    }
}

struct FakeGateway;

impl PaymentGateway for FakeGateway {
    fn create_checkout<'a>(
        &'a self,
        session_id: &'a str,
        _amount: &'a Decimal,
        _currency: &'a str,
    ) -> BoxFut<'a, Result<CheckoutHandle>> {
        let payment_ref = format!("pay-{session_id}");
        Box::pin(async move {
            Ok(CheckoutHandle {
                redirect_url: format!("https://pay.example/{payment_ref}"),
                payment_ref,
            })
        })
    }
}

struct FlatEmbedder;

impl tripcover_rs::rag::EmbeddingBackend for FlatEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFut<'a, Result<Vec<f32>>> {
        let value = text.len() as f32;
        Box::pin(async move { Ok(vec![value, 1.0]) })
    }
}

struct MuteSpeech;

impl tripcover_rs::voice::SpeechBackend for MuteSpeech {
    fn transcribe<'a>(&'a self, _audio: &'a [u8]) -> BoxFut<'a, Result<Transcription>> {
        Box::pin(async {
            Err(Error::DownstreamUnavailable {
                service: "speech",
                detail: "not under test".into(),
            })
        })
    }

    fn synthesize<'a>(&'a self, _text: &'a str, _voice: &'a str) -> BoxFut<'a, Result<Vec<u8>>> {
        Box::pin(async { Ok(vec![]) })
    }
}

// ── Harness ────────────────────────────────────────────────────────

async fn spawn_test_server() -> (Arc<Assistant>, String) {
    let assistant = Arc::new(Assistant::new(
        AppConfig::default(),
        Backends {
            llm: Arc::new(RouterLlm),
            ocr: Arc::new(FakeOcr),
            embedder: Arc::new(FlatEmbedder),
            insurer: Arc::new(FakeInsurer),
            gateway: Arc::new(FakeGateway),
            speech: Arc::new(MuteSpeech),
        },
    ));

    let config = WebConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
    };
    let addr = spawn_web(assistant.clone(), WEBHOOK_SECRET.to_string(), config)
        .await
        .unwrap();
    (assistant, format!("http://{addr}"))
}

async fn open_session(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/api/sessions"))
        .json(&serde_json::json!({
            "user_id": "u-1",
            "first_name": "Ana",
            "last_name": "Lim",
            "email": "ana@example.com"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    json["session_id"].as_str().unwrap().to_string()
}

async fn chat(
    client: &reqwest::Client,
    base: &str,
    session_id: &str,
    text: &str,
) -> serde_json::Value {
    let resp = client
        .post(format!("{base}/api/chat"))
        .json(&serde_json::json!({ "session_id": session_id, "message_text": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn quote_turn_returns_tiers_and_snapshot() {
    let (_assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let session_id = open_session(&client, &base).await;

    let reply = chat(
        &client,
        &base,
        &session_id,
        "Quote for Thailand, 16-23 Nov 2030, 1 adult age 32",
    )
    .await;

    let text = reply["assistant_text"].as_str().unwrap();
    assert!(text.contains("28.45"));
    assert!(text.contains("51.21"));

    let snapshot = &reply["state_snapshot"];
    assert_eq!(snapshot["destinations"][0], "Thailand");
    assert_eq!(snapshot["travelers_count"], 1);
    assert_eq!(snapshot["dialogue_state"], "tier_offered");
    assert_eq!(reply["quote"]["recommended_tier"], "standard");
    assert!(reply["quote"]["valid_for_secs"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn full_purchase_via_signed_webhook() {
    let (assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let session_id = open_session(&client, &base).await;

    chat(&client, &base, &session_id, "Thailand 16-23 Nov 2030, 1 adult 32").await;
    let reply = chat(&client, &base, &session_id, "elite please").await;
    let payment_ref = reply["state_snapshot"]["checkout"]["payment_ref"]
        .as_str()
        .unwrap()
        .to_string();

    // Tampered signature: discarded but acknowledged.
    let body = serde_json::json!({ "payment_ref": payment_ref, "event": "confirmed" }).to_string();
    let resp = client
        .post(format!("{base}/webhooks/payment"))
        .header(webhook::SIGNATURE_HEADER, "00".repeat(32))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(assistant.purchase().policies().len(), 0);

    // Correctly signed delivery binds the policy.
    let resp = client
        .post(format!("{base}/webhooks/payment"))
        .header(webhook::SIGNATURE_HEADER, webhook::sign(WEBHOOK_SECRET, body.as_bytes()))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Poll until the bind lands (the webhook defers work to a task).
    let mut status = String::new();
    for _ in 0..50 {
        let resp = client
            .get(format!("{base}/api/payment/{session_id}"))
            .send()
            .await
            .unwrap();
        let json: serde_json::Value = resp.json().await.unwrap();
        status = json["status"].as_str().unwrap_or_default().to_string();
        if json["stop_polling"].as_bool().unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "confirmed");
    assert_eq!(assistant.purchase().policies().len(), 1);

    // Replay the same delivery: still exactly one policy.
    let resp = client
        .post(format!("{base}/webhooks/payment"))
        .header(webhook::SIGNATURE_HEADER, webhook::sign(WEBHOOK_SECRET, body.as_bytes()))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(assistant.purchase().policies().len(), 1);
}

#[tokio::test]
async fn upload_extracts_and_merges_document() {
    let (_assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let session_id = open_session(&client, &base).await;

    let form = reqwest::multipart::Form::new()
        .text("session_id", session_id.clone())
        .text("user_message", "here's my flight")
        .part(
            "file",
            reqwest::multipart::Part::bytes(vec![0u8; 512]).file_name("flight.pdf"),
        );
    let resp = client
        .post(format!("{base}/api/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(json["extracted_data"]["document_type"], "flight_confirmation");
    assert_eq!(json["state_snapshot"]["destinations"][0], "Japan");

    // Patch a field and confirm re-bucketing.
    let document_id = json["extracted_data"]["id"].as_str().unwrap();
    let resp = client
        .patch(format!("{base}/api/documents/{document_id}"))
        .json(&serde_json::json!({
            "structured_fields": {"pnr": "X1Y2Z3"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    let high = json["document"]["high_confidence_fields"].as_array().unwrap();
    assert!(high.iter().any(|v| v == "pnr"));
}

#[tokio::test]
async fn get_session_returns_history() {
    let (_assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let session_id = open_session(&client, &base).await;
    chat(&client, &base, &session_id, "hello there").await;

    let resp = client
        .get(format!("{base}/api/sessions/{session_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");

    // Listing includes the session.
    let resp = client.get(format!("{base}/api/sessions")).send().await.unwrap();
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["sessions"].as_array().unwrap().iter().any(|s| {
        s["session_id"] == session_id.as_str()
    }));
}

#[tokio::test]
async fn unknown_session_is_404_and_no_checkout_is_409() {
    let (_assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/chat"))
        .json(&serde_json::json!({ "session_id": "sess-nope", "message_text": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let session_id = open_session(&client, &base).await;
    let resp = client
        .get(format!("{base}/api/payment/{session_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn corpus_ingest_reports_chunk_count() {
    let (_assistant, base) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/corpus"))
        .json(&serde_json::json!({
            "title": "Travel Policy",
            "insurer_name": "Acme",
            "product_code": "TRV",
            "content": "## 2.1 Medical\nCovered.\n\n## 2.2 Baggage\nCovered.",
            "split_by_sections": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["chunks"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn product_catalog_is_reachable() {
    let (_assistant, base) = spawn_test_server().await;
    let resp = reqwest::get(format!("{base}/api/products")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["products"].is_array());
}
