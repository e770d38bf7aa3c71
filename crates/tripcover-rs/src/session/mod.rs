//! Sessions, slots, and the dialogue state machine.
//!
//! A [`Session`] is an append-only message log plus a [`SessionState`] slot
//! mapping. Dialogue state is always a *derived view* of the slots
//! ([`DialogueState::derive`]) — it is never stored, so state and slots
//! cannot disagree.
//!
//! Only the orchestrator mutates sessions, and only under the per-session
//! lock held by the [`SessionStore`](store::SessionStore).

pub mod store;

pub use store::{SessionStore, SessionSummary};

use crate::docs::ExtractedDocument;
use crate::pricing::{Quote, Tier, TripType};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Messages ───────────────────────────────────────────────────────

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

// ── Slots ──────────────────────────────────────────────────────────

/// Classified conversation intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Quote,
    PolicyQa,
    ClaimQa,
    HumanHandoff,
    Smalltalk,
    #[default]
    Unknown,
}

impl Intent {
    pub fn from_label(label: &str) -> Intent {
        match label {
            "quote" => Intent::Quote,
            "policy_qa" => Intent::PolicyQa,
            "claim_qa" => Intent::ClaimQa,
            "human_handoff" => Intent::HumanHandoff,
            "smalltalk" => Intent::Smalltalk,
            _ => Intent::Unknown,
        }
    }
}

/// Trip slots, each optional until filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripSlots {
    /// Canonical country names, first-seen order.
    pub destinations: Vec<String>,
    pub departure_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub trip_type: Option<TripType>,
}

/// Traveler slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TravelerSlots {
    pub count: Option<u32>,
    pub ages: Vec<u32>,
}

/// Preference slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceSlots {
    /// `None` until the user answers (or declines, which defaults false).
    pub adventure_sports: Option<bool>,
}

/// Where a slot value came from, for merge tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SlotSource {
    User,
    Document { uploaded_at: DateTime<Utc> },
}

/// Provenance of a filled slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub confidence: f64,
    pub source: SlotSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Provenance {
    pub fn user(confidence: f64) -> Self {
        Self {
            confidence,
            source: SlotSource::User,
            confirmed_at: None,
        }
    }

    pub fn document(confidence: f64, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            confidence,
            source: SlotSource::Document { uploaded_at },
            confirmed_at: None,
        }
    }
}

// ── Checkout ───────────────────────────────────────────────────────

/// Lifecycle of a payment checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Initiated,
    Confirmed,
    Canceled,
    Failed,
    NeedsReissue,
    BindFailed,
}

impl CheckoutStatus {
    /// Whether polling clients should stop once they see this status.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            CheckoutStatus::Confirmed | CheckoutStatus::BindFailed | CheckoutStatus::Canceled
        )
    }
}

/// The checkout slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
    pub payment_ref: String,
    pub redirect_url: String,
    pub status: CheckoutStatus,
    pub tier: Tier,
}

// ── Review & handoff ───────────────────────────────────────────────

/// Low-confidence document fields awaiting user confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReview {
    pub document_id: String,
    pub fields: Vec<String>,
}

/// A structured human-handoff request. Routing to an agent does not end
/// the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub session_id: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// A downstream failure the orchestrator is recovering from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// ── State ──────────────────────────────────────────────────────────

/// The slot mapping plus control fields. Mutated only by the orchestrator
/// (checkout and policy linkage via the purchase coordinator).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub intent: Intent,
    pub trip: TripSlots,
    pub travelers: TravelerSlots,
    pub preferences: PreferenceSlots,
    pub quote: Option<Quote>,
    pub selected_tier: Option<Tier>,
    pub checkout: Option<Checkout>,
    pub document_data: Vec<ExtractedDocument>,
    pub awaiting_confirmation: bool,
    /// Slot path → provenance of the current value.
    pub provenance: HashMap<String, Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<PendingReview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryContext>,
    /// Set once a policy is bound; makes the quote flow terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

/// Slot paths required before quoting can start.
pub const REQUIRED_QUOTE_SLOTS: &[&str] = &[
    "trip.destinations",
    "trip.departure_date",
    "trip.return_date",
    "travelers.count",
    "travelers.ages",
    "preferences.adventure_sports",
];

impl SessionState {
    /// Required slot paths still unfilled for a quote.
    pub fn missing_quote_slots(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.trip.destinations.is_empty() {
            missing.push("trip.destinations");
        }
        if self.trip.departure_date.is_none() {
            missing.push("trip.departure_date");
        }
        if self.trip.return_date.is_none() {
            missing.push("trip.return_date");
        }
        if self.travelers.count.is_none() {
            missing.push("travelers.count");
        }
        let count = self.travelers.count.unwrap_or(0) as usize;
        if self.travelers.ages.len() != count || count == 0 {
            missing.push("travelers.ages");
        }
        if self.preferences.adventure_sports.is_none() {
            missing.push("preferences.adventure_sports");
        }
        missing
    }

    pub fn quote_slots_complete(&self) -> bool {
        self.missing_quote_slots().is_empty()
    }

    /// The current quote if it has not expired.
    pub fn live_quote(&self, now: DateTime<Utc>) -> Option<&Quote> {
        self.quote.as_ref().filter(|q| !q.is_expired(now))
    }
}

// ── Dialogue state ─────────────────────────────────────────────────

/// Derived view of where a session is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Greeting,
    IntentRouting,
    SlotFill,
    DocReview,
    Quoting,
    TierOffered,
    CheckoutInit,
    AwaitingPayment,
    Binding,
    Bound,
    ErrorRecovery,
    PolicyQa,
    ClaimQa,
    Handoff,
    Smalltalk,
}

impl DialogueState {
    /// Derive the state from the slots.
    pub fn derive(session: &Session, now: DateTime<Utc>) -> DialogueState {
        let state = &session.state;

        if session.messages.is_empty() {
            return DialogueState::Greeting;
        }
        if state.policy_id.is_some() {
            return DialogueState::Bound;
        }
        if let Some(checkout) = &state.checkout {
            match checkout.status {
                CheckoutStatus::Initiated => return DialogueState::AwaitingPayment,
                CheckoutStatus::Confirmed => return DialogueState::Binding,
                CheckoutStatus::BindFailed => return DialogueState::ErrorRecovery,
                // Canceled / failed / needs-reissue checkouts fall back to
                // the quote-based derivation below.
                CheckoutStatus::Canceled
                | CheckoutStatus::Failed
                | CheckoutStatus::NeedsReissue => {}
            }
        }
        if state.recovery.is_some() {
            return DialogueState::ErrorRecovery;
        }
        if state.pending_review.is_some() {
            return DialogueState::DocReview;
        }

        match state.intent {
            Intent::Quote => {
                if let Some(quote) = state.live_quote(now) {
                    match state.selected_tier {
                        Some(tier) if quote.has_tier(tier) => DialogueState::CheckoutInit,
                        _ => DialogueState::TierOffered,
                    }
                } else if state.quote_slots_complete() {
                    DialogueState::Quoting
                } else {
                    DialogueState::SlotFill
                }
            }
            Intent::PolicyQa => DialogueState::PolicyQa,
            Intent::ClaimQa => DialogueState::ClaimQa,
            Intent::HumanHandoff => DialogueState::Handoff,
            Intent::Smalltalk => DialogueState::Smalltalk,
            Intent::Unknown => DialogueState::IntentRouting,
        }
    }

    /// Whether the state machine permits a `from → to` edge. Used as an
    /// integrity check over derived states; same-state is always allowed.
    pub fn can_transition(from: DialogueState, to: DialogueState) -> bool {
        use DialogueState as D;
        if from == to {
            return true;
        }
        match from {
            // Bound is terminal for the quote flow; only Q&A-style turns
            // may follow.
            D::Bound => matches!(
                to,
                D::PolicyQa | D::ClaimQa | D::Smalltalk | D::Handoff | D::IntentRouting
            ),
            // Bound is only reachable through Binding.
            _ if to == D::Bound => from == D::Binding,
            D::Binding => matches!(to, D::ErrorRecovery),
            D::AwaitingPayment => matches!(
                to,
                D::Binding | D::TierOffered | D::SlotFill | D::Quoting | D::ErrorRecovery
            ),
            _ => true,
        }
    }
}

impl DialogueState {
    pub fn label(&self) -> &'static str {
        match self {
            DialogueState::Greeting => "greeting",
            DialogueState::IntentRouting => "intent_routing",
            DialogueState::SlotFill => "slot_fill",
            DialogueState::DocReview => "doc_review",
            DialogueState::Quoting => "quoting",
            DialogueState::TierOffered => "tier_offered",
            DialogueState::CheckoutInit => "checkout_init",
            DialogueState::AwaitingPayment => "awaiting_payment",
            DialogueState::Binding => "binding",
            DialogueState::Bound => "bound",
            DialogueState::ErrorRecovery => "error_recovery",
            DialogueState::PolicyQa => "policy_qa",
            DialogueState::ClaimQa => "claim_qa",
            DialogueState::Handoff => "handoff",
            DialogueState::Smalltalk => "smalltalk",
        }
    }
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Session ────────────────────────────────────────────────────────

/// The user profile owning a session. Also the single insured + main
/// contact at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// A conversation session. Never deleted; marked terminal when a policy is
/// bound or the session is explicitly abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user: UserProfile,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<SessionMessage>,
    pub state: SessionState,
    pub terminal: bool,
}

impl Session {
    pub fn new(id: String, user: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user,
            created_at: now,
            messages: Vec::new(),
            state: SessionState::default(),
            terminal: false,
        }
    }

    /// Append a message, keeping timestamps strictly increasing.
    pub fn push_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        attachment: Option<String>,
        now: DateTime<Utc>,
    ) {
        let floor = self
            .messages
            .last()
            .map(|m| m.timestamp + Duration::milliseconds(1));
        let timestamp = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };
        self.messages.push(SessionMessage {
            role,
            timestamp,
            content: content.into(),
            attachment,
        });
    }

    /// Mark the session abandoned (terminal without a policy).
    pub fn abandon(&mut self) {
        self.terminal = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{InsurerReference, TierOffer};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn now() -> DateTime<Utc> {
        "2025-08-01T12:00:00Z".parse().unwrap()
    }

    fn profile() -> UserProfile {
        UserProfile {
            user_id: "u-1".into(),
            first_name: "Ana".into(),
            last_name: "Lim".into(),
            email: "ana@example.com".into(),
        }
    }

    fn quote_with_tiers(tiers: &[Tier]) -> Quote {
        let mut table = BTreeMap::new();
        for tier in tiers {
            table.insert(
                *tier,
                TierOffer {
                    price: Decimal::from_str("51.21").unwrap(),
                    currency: "SGD".into(),
                    coverage: crate::pricing::CoverageTemplates::default().standard.clone(),
                },
            );
        }
        Quote {
            fingerprint: "fp".into(),
            insurer_reference: InsurerReference {
                quote_id: "q-1".into(),
                offer_id: "off-1".into(),
                product_code: "TRV".into(),
                unit_price: Decimal::from_str("51.21").unwrap(),
                currency: "SGD".into(),
            },
            tiers: table,
            recommended_tier: Tier::Elite,
            issued_at: now(),
            expires_at: now() + Duration::hours(24),
        }
    }

    fn filled_session() -> Session {
        let mut session = Session::new("s-1".into(), profile(), now());
        session.push_message(Role::User, "quote please", None, now());
        session.state.intent = Intent::Quote;
        session.state.trip.destinations = vec!["Thailand".into()];
        session.state.trip.departure_date = NaiveDate::from_ymd_opt(2025, 11, 16);
        session.state.trip.return_date = NaiveDate::from_ymd_opt(2025, 11, 23);
        session.state.travelers.count = Some(1);
        session.state.travelers.ages = vec![32];
        session.state.preferences.adventure_sports = Some(false);
        session
    }

    #[test]
    fn empty_session_is_greeting() {
        let session = Session::new("s-1".into(), profile(), now());
        assert_eq!(DialogueState::derive(&session, now()), DialogueState::Greeting);
    }

    #[test]
    fn missing_slots_derives_slot_fill() {
        let mut session = filled_session();
        session.state.preferences.adventure_sports = None;
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::SlotFill
        );
        assert_eq!(
            session.state.missing_quote_slots(),
            vec!["preferences.adventure_sports"]
        );
    }

    #[test]
    fn complete_slots_derives_quoting_then_tier_offered() {
        let mut session = filled_session();
        assert_eq!(DialogueState::derive(&session, now()), DialogueState::Quoting);

        session.state.quote = Some(quote_with_tiers(&[Tier::Standard, Tier::Elite, Tier::Premier]));
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::TierOffered
        );
    }

    #[test]
    fn expired_quote_falls_back_to_quoting() {
        let mut session = filled_session();
        session.state.quote = Some(quote_with_tiers(&[Tier::Elite, Tier::Premier]));
        let after_expiry = now() + Duration::hours(25);
        assert_eq!(
            DialogueState::derive(&session, after_expiry),
            DialogueState::Quoting
        );
    }

    #[test]
    fn checkout_statuses_drive_derivation() {
        let mut session = filled_session();
        session.state.quote = Some(quote_with_tiers(&[Tier::Elite]));
        session.state.selected_tier = Some(Tier::Elite);
        session.state.checkout = Some(Checkout {
            payment_ref: "pay-1".into(),
            redirect_url: "https://pay.example/1".into(),
            status: CheckoutStatus::Initiated,
            tier: Tier::Elite,
        });
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::AwaitingPayment
        );

        session.state.checkout.as_mut().unwrap().status = CheckoutStatus::Confirmed;
        assert_eq!(DialogueState::derive(&session, now()), DialogueState::Binding);

        session.state.checkout.as_mut().unwrap().status = CheckoutStatus::BindFailed;
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::ErrorRecovery
        );

        // Canceled checkout falls back to tier selection.
        session.state.checkout.as_mut().unwrap().status = CheckoutStatus::Canceled;
        session.state.selected_tier = None;
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::TierOffered
        );
    }

    #[test]
    fn bound_policy_is_terminal_state() {
        let mut session = filled_session();
        session.state.policy_id = Some("pol-1".into());
        assert_eq!(DialogueState::derive(&session, now()), DialogueState::Bound);
    }

    #[test]
    fn transition_guard_blocks_backward_edges_from_bound() {
        assert!(!DialogueState::can_transition(
            DialogueState::Bound,
            DialogueState::TierOffered
        ));
        assert!(!DialogueState::can_transition(
            DialogueState::Bound,
            DialogueState::SlotFill
        ));
        assert!(DialogueState::can_transition(
            DialogueState::Bound,
            DialogueState::PolicyQa
        ));
    }

    #[test]
    fn bound_only_reachable_from_binding() {
        assert!(DialogueState::can_transition(
            DialogueState::Binding,
            DialogueState::Bound
        ));
        assert!(!DialogueState::can_transition(
            DialogueState::TierOffered,
            DialogueState::Bound
        ));
        assert!(!DialogueState::can_transition(
            DialogueState::AwaitingPayment,
            DialogueState::Bound
        ));
    }

    #[test]
    fn message_timestamps_strictly_increase() {
        let mut session = Session::new("s-1".into(), profile(), now());
        session.push_message(Role::User, "a", None, now());
        session.push_message(Role::Assistant, "b", None, now());
        session.push_message(Role::User, "c", None, now());

        let stamps: Vec<_> = session.messages.iter().map(|m| m.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ages_must_match_count() {
        let mut session = filled_session();
        session.state.travelers.count = Some(2);
        assert!(session
            .state
            .missing_quote_slots()
            .contains(&"travelers.ages"));
    }

    #[test]
    fn selected_tier_must_exist_in_quote() {
        let mut session = filled_session();
        session.state.quote = Some(quote_with_tiers(&[Tier::Elite, Tier::Premier]));
        // A stale standard selection does not reach checkout.
        session.state.selected_tier = Some(Tier::Standard);
        assert_eq!(
            DialogueState::derive(&session, now()),
            DialogueState::TierOffered
        );
    }
}
