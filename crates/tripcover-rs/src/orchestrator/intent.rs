//! LLM-assisted intent classification.
//!
//! Classifies the last user message against a bounded window of recent
//! conversation. Low-confidence classifications degrade to `unknown`; when
//! the dialogue state constrains the intent (mid-payment, mid-review), the
//! state wins and the caller appends a soft clarifier instead.

use crate::session::{Intent, Role, SessionMessage};
use crate::{LlmBackend, Result, complete_json};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

/// How many recent messages the classifier sees.
pub const INTENT_CONTEXT_WINDOW: usize = 6;

/// Below this confidence the intent is treated as unknown and a
/// clarifying question is asked.
pub const INTENT_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Deserialize, JsonSchema)]
struct IntentReply {
    /// One of `quote`, `policy_qa`, `claim_qa`, `human_handoff`,
    /// `smalltalk`, `unknown`.
    intent: String,
    confidence: f64,
}

/// Classify the conversation's current intent.
///
/// Returns the label and its confidence; enforcement of the confidence
/// floor is the caller's job so it can also apply state constraints.
pub async fn classify(
    llm: &dyn LlmBackend,
    model: &str,
    messages: &[SessionMessage],
) -> Result<(Intent, f64)> {
    let window_start = messages.len().saturating_sub(INTENT_CONTEXT_WINDOW);
    let window = messages.get(window_start..).unwrap_or_default();

    let transcript = window
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let system = "You classify the user's intent in a travel-insurance \
        conversation. Reply with a JSON object {\"intent\": \"...\", \
        \"confidence\": 0.0-1.0}. intent must be one of: quote (get or \
        adjust an insurance quote, give trip details, pick a tier, pay), \
        policy_qa (what does the policy cover), claim_qa (how to claim, \
        required documents), human_handoff (asks for a person), smalltalk \
        (greetings, chitchat), unknown.";

    let reply: IntentReply = complete_json(llm, model, system, &transcript).await?;
    let confidence = reply.confidence.clamp(0.0, 1.0);
    let intent = Intent::from_label(&reply.intent);
    debug!("intent: {intent:?} (confidence {confidence:.2})");
    Ok((intent, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxFut, ChatRequest};
    use chrono::Utc;

    struct CapturingLlm {
        reply: String,
        last_user: std::sync::Mutex<String>,
    }

    impl LlmBackend for CapturingLlm {
        fn complete(&self, request: ChatRequest) -> BoxFut<'_, Result<String>> {
            if let Some(user) = request
                .messages
                .iter()
                .find(|m| m.role == crate::ChatRole::User)
            {
                *self.last_user.lock().unwrap() = user.content.clone();
            }
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    fn message(role: Role, content: &str) -> SessionMessage {
        SessionMessage {
            role,
            timestamp: Utc::now(),
            content: content.into(),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn classification_parses_reply() {
        let llm = CapturingLlm {
            reply: r#"{"intent": "quote", "confidence": 0.93}"#.into(),
            last_user: std::sync::Mutex::new(String::new()),
        };
        let (intent, confidence) = classify(
            &llm,
            "m",
            &[message(Role::User, "I need insurance for Thailand")],
        )
        .await
        .unwrap();
        assert_eq!(intent, Intent::Quote);
        assert!((confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn window_is_bounded_to_recent_messages() {
        let llm = CapturingLlm {
            reply: r#"{"intent": "smalltalk", "confidence": 0.8}"#.into(),
            last_user: std::sync::Mutex::new(String::new()),
        };
        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(message(Role::User, &format!("message {i}")));
        }
        classify(&llm, "m", &messages).await.unwrap();

        let seen = llm.last_user.lock().unwrap().clone();
        assert!(!seen.contains("message 3"), "old messages must be dropped");
        assert!(seen.contains("message 9"));
        assert!(seen.contains("message 4"));
    }

    #[tokio::test]
    async fn unknown_label_maps_to_unknown() {
        let llm = CapturingLlm {
            reply: r#"{"intent": "weather_report", "confidence": 0.9}"#.into(),
            last_user: std::sync::Mutex::new(String::new()),
        };
        let (intent, _) = classify(&llm, "m", &[message(Role::User, "hm")])
            .await
            .unwrap();
        assert_eq!(intent, Intent::Unknown);
    }
}
