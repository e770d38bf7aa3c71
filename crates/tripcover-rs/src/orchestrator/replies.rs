//! User-visible assistant phrasing.
//!
//! The orchestrator is the single place error kinds and flow events become
//! words; every template lives here so tone stays consistent and the rest
//! of the crate never writes user-facing text.

use crate::docs::{ExtractedDocument, value_at_path};
use crate::insurer::ClaimChecklist;
use crate::pricing::{Quote, Tier};
use crate::session::SessionState;

pub fn greeting() -> String {
    "Hi! I can get you a travel-insurance quote in a couple of messages, answer \
     questions about what a policy covers, or help with a claim. Where are you \
     headed?"
        .to_string()
}

pub fn clarify_intent() -> String {
    "I want to make sure I help with the right thing — are you after a quote, a \
     coverage question, or help with a claim?"
        .to_string()
}

/// One batched question for every missing required slot.
pub fn ask_missing_slots(state: &SessionState) -> String {
    let missing = state.missing_quote_slots();
    let mut asks: Vec<&str> = Vec::new();
    if missing.contains(&"trip.destinations") {
        asks.push("where you're traveling");
    }
    if missing.contains(&"trip.departure_date") || missing.contains(&"trip.return_date") {
        asks.push("your travel dates");
    }
    if missing.contains(&"travelers.count") || missing.contains(&"travelers.ages") {
        asks.push("how many travelers and their ages");
    }
    if missing.contains(&"preferences.adventure_sports") {
        asks.push("whether the trip includes adventure sports like skiing or diving");
    }

    match asks.len() {
        0 => "Got everything I need — one moment while I price that.".to_string(),
        1 => format!("Almost there — just tell me {}.", asks[0]),
        _ => {
            let head: Vec<&str> = asks.iter().take(asks.len() - 1).copied().collect();
            format!(
                "To price this I still need {} and {}.",
                head.join(", "),
                asks[asks.len() - 1]
            )
        }
    }
}

/// The tier table offered after pricing.
pub fn offer_tiers(quote: &Quote) -> String {
    let mut lines = vec!["Here are your options:".to_string()];
    for (tier, offer) in &quote.tiers {
        let marker = if *tier == quote.recommended_tier {
            " — recommended"
        } else {
            ""
        };
        lines.push(format!(
            "• {}: {} {}{marker}",
            title_case(tier.label()),
            offer.currency,
            offer.price
        ));
    }
    lines.push(
        "Which tier would you like? The quote is valid for 24 hours.".to_string(),
    );
    lines.join("\n")
}

pub fn checkout_started(tier: Tier, redirect_url: &str) -> String {
    format!(
        "Great choice — {} it is. Complete your payment here: {redirect_url}\n\
         I'll confirm your policy as soon as the payment goes through.",
        title_case(tier.label())
    )
}

pub fn awaiting_payment() -> String {
    "Your payment link is still open — I'll confirm the policy the moment the \
     payment completes. Say \"cancel\" if you'd like to pick a different tier."
        .to_string()
}

pub fn payment_canceled() -> String {
    "No problem, I've canceled that checkout. Would you like a different tier?".to_string()
}

pub fn bound(policy_id: &str) -> String {
    format!(
        "You're covered! Your policy {policy_id} is bound and a confirmation is \
         on its way to your email. Ask me anytime what it covers."
    )
}

pub fn bind_failed_payment_safe() -> String {
    "Your payment went through safely, but I hit a problem issuing the policy. \
     I've flagged this to a specialist who will finish it for you — you won't \
     need to pay again."
        .to_string()
}

pub fn quote_needs_reissue() -> String {
    "Your payment arrived after the quote's 24-hour window, so here's a fresh \
     price for the same trip — your payment is safe and will be applied."
        .to_string()
}

pub fn pricing_unavailable() -> String {
    "I couldn't get a price right now — the insurer isn't responding. Want me \
     to try again, or would you like me to pass you to a person?"
        .to_string()
}

pub fn invalid_trip(detail: &str) -> String {
    format!("Small problem with the trip details: {detail}. Could you double-check?")
}

pub fn timeout_apology() -> String {
    "Sorry — that took longer than it should have. Could you try that again?".to_string()
}

pub fn handoff_confirmed() -> String {
    "I've asked a human colleague to pick this up — they'll have the full \
     conversation so you won't need to repeat yourself."
        .to_string()
}

pub fn not_covered() -> String {
    "That's not covered in the policy I have. Would you like me to hand you to \
     a person to be sure?"
        .to_string()
}

pub fn claim_checklist(checklist: &ClaimChecklist) -> String {
    if checklist.required_documents.is_empty() {
        return format!(
            "For a {} claim, no documents are listed — a claims specialist will \
             guide you through the next steps.",
            checklist.claim_type
        );
    }
    let mut lines = vec![format!(
        "For a {} claim you'll need:",
        checklist.claim_type
    )];
    for document in &checklist.required_documents {
        lines.push(format!("• {document}"));
    }
    lines.push("Shall I connect you with the claims team?".to_string());
    lines.join("\n")
}

/// Ask the user to confirm low-confidence document fields.
pub fn review_document(document: &ExtractedDocument) -> String {
    let mut lines = vec![format!(
        "I've read your {} — a few values I'm not fully sure about:",
        document.document_type
    )];
    for field_path in &document.low_confidence_fields {
        let value = value_at_path(&document.structured_fields, field_path)
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .unwrap_or_else(|| v.to_string())
            })
            .unwrap_or_else(|| "?".to_string());
        lines.push(format!("• {}: {value}", humanize_path(field_path)));
    }
    lines.push(
        "Reply \"confirm\" if these look right, \"discard\" to ignore them, or \
         just type the corrections."
            .to_string(),
    );
    lines.join("\n")
}

pub fn document_unreadable() -> String {
    "I couldn't read that document well enough to use it — could you try a \
     clearer photo or PDF? You can also just type the trip details."
        .to_string()
}

pub fn mid_payment_clarifier() -> String {
    "(If you meant to ask about something else, tell me once we've wrapped up \
     this payment.)"
        .to_string()
}

fn humanize_path(path: &str) -> String {
    path.replace('.', " ").replace('_', " ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
