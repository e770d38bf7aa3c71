//! Serializable projection of session state for REST transport.
//!
//! `SessionState` carries internals the UI has no use for (provenance
//! maps, raw quote references) and absolute expiry instants. The snapshot
//! converts these into wire-friendly panels: trip/traveler/preference
//! values, tier prices, quote validity as seconds remaining, and document
//! summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tripcover_rs::pricing::Tier;
use tripcover_rs::session::{CheckoutStatus, DialogueState, Session, SessionState};

/// Wire view of the session state.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub dialogue_state: String,
    pub intent: serde_json::Value,

    // ── Trip panel ──
    pub destinations: Vec<String>,
    pub departure_date: Option<String>,
    pub return_date: Option<String>,
    pub travelers_count: Option<u32>,
    pub traveler_ages: Vec<u32>,
    pub adventure_sports: Option<bool>,

    // ── Quote panel ──
    pub quote: Option<QuoteSnapshot>,
    pub selected_tier: Option<Tier>,

    // ── Checkout ──
    pub checkout: Option<CheckoutSnapshot>,

    // ── Documents ──
    pub documents: Vec<DocumentSnapshot>,

    pub awaiting_confirmation: bool,
    pub pending_review: bool,
    pub handoff_requested: bool,
    pub policy_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuoteSnapshot {
    pub tiers: Vec<TierSnapshot>,
    pub recommended_tier: Tier,
    /// Seconds until the quote expires; zero once elapsed.
    pub valid_for_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct TierSnapshot {
    pub tier: Tier,
    pub price: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSnapshot {
    pub payment_ref: String,
    pub redirect_url: String,
    pub status: CheckoutStatus,
}

#[derive(Debug, Serialize)]
pub struct DocumentSnapshot {
    pub id: String,
    pub source_filename: String,
    pub document_type: String,
    pub high_confidence_fields: usize,
    pub low_confidence_fields: usize,
    pub missing_fields: usize,
}

impl StateSnapshot {
    /// Build a snapshot from a session. Should be called while holding the
    /// session lock.
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self::from_state(
            &session.state,
            DialogueState::derive(session, now).label(),
            now,
        )
    }

    /// Build a snapshot from a bare state (turn outcomes carry the state
    /// without the surrounding session).
    pub fn from_state(state: &SessionState, dialogue_state: &str, now: DateTime<Utc>) -> Self {
        let quote = state.quote.as_ref().map(|quote| QuoteSnapshot {
            tiers: quote
                .tiers
                .iter()
                .map(|(tier, offer)| TierSnapshot {
                    tier: *tier,
                    price: offer.price.to_string(),
                    currency: offer.currency.clone(),
                })
                .collect(),
            recommended_tier: quote.recommended_tier,
            valid_for_secs: (quote.expires_at - now).num_seconds().max(0),
        });

        let checkout = state.checkout.as_ref().map(|checkout| CheckoutSnapshot {
            payment_ref: checkout.payment_ref.clone(),
            redirect_url: checkout.redirect_url.clone(),
            status: checkout.status,
        });

        let documents = state
            .document_data
            .iter()
            .map(|document| DocumentSnapshot {
                id: document.id.clone(),
                source_filename: document.source_filename.clone(),
                document_type: document.document_type.to_string(),
                high_confidence_fields: document.high_confidence_fields.len(),
                low_confidence_fields: document.low_confidence_fields.len(),
                missing_fields: document.missing_fields.len(),
            })
            .collect();

        Self {
            dialogue_state: dialogue_state.to_string(),
            intent: serde_json::to_value(state.intent).unwrap_or_default(),
            destinations: state.trip.destinations.clone(),
            departure_date: state.trip.departure_date.map(|d| d.to_string()),
            return_date: state.trip.return_date.map(|d| d.to_string()),
            travelers_count: state.travelers.count,
            traveler_ages: state.travelers.ages.clone(),
            adventure_sports: state.preferences.adventure_sports,
            quote,
            selected_tier: state.selected_tier,
            checkout,
            documents,
            awaiting_confirmation: state.awaiting_confirmation,
            pending_review: state.pending_review.is_some(),
            handoff_requested: state.handoff.is_some(),
            policy_id: state.policy_id.clone(),
        }
    }
}
