//! LLM-assisted slot extraction.
//!
//! One strict-JSON call per turn pulls trip/traveler/preference facts out
//! of the recent conversation; deterministic post-processing normalizes
//! dates, destinations, and ages. The extractor returns a sparse patch
//! list and *never* raises — a parse failure is an empty patch.

pub mod normalize;

use crate::session::{SessionMessage, SessionState};
use crate::{LlmBackend, complete_json};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One extracted slot value.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPatch {
    /// Dotted slot path, e.g. `trip.departure_date`.
    pub path: String,
    pub value: serde_json::Value,
    pub confidence: f64,
}

/// The extractor's result: sparse patches plus notes to relay to the user
/// (contradictions, unquotable destinations).
#[derive(Debug, Clone, Default)]
pub struct SlotPatches {
    pub patches: Vec<SlotPatch>,
    pub notes: Vec<String>,
}

impl SlotPatches {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.notes.is_empty()
    }
}

// ── LLM reply shape ────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfString {
    value: String,
    confidence: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfStringList {
    value: Vec<String>,
    confidence: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfInt {
    value: i64,
    confidence: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfIntList {
    value: Vec<i64>,
    confidence: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfBool {
    value: bool,
    confidence: f64,
}

/// Raw extraction reply. Every field optional — the model only reports
/// what the conversation actually said.
#[derive(Debug, Deserialize, JsonSchema)]
struct RawSlotExtraction {
    destinations: Option<ConfStringList>,
    departure_date: Option<ConfString>,
    return_date: Option<ConfString>,
    /// `"one_way"` or `"return"`.
    trip_type: Option<ConfString>,
    travelers_count: Option<ConfInt>,
    traveler_ages: Option<ConfIntList>,
    adventure_sports: Option<ConfBool>,
    /// True when the user explicitly declined to state a preference.
    adventure_sports_declined: Option<ConfBool>,
}

// ── Extractor ──────────────────────────────────────────────────────

/// The slot extractor service.
pub struct SlotExtractor {
    llm: Arc<dyn LlmBackend>,
    model: String,
}

impl SlotExtractor {
    pub fn new(llm: Arc<dyn LlmBackend>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Extract slot patches from the recent conversation.
    ///
    /// `today` is the session clock used to resolve relative dates.
    /// Never raises: any LLM or parse failure returns an empty patch.
    pub async fn extract(
        &self,
        context: &[SessionMessage],
        state: &SessionState,
        today: NaiveDate,
    ) -> SlotPatches {
        let system = self.system_prompt(state, today);
        let transcript = context
            .iter()
            .map(|m| {
                let role = match m.role {
                    crate::session::Role::User => "user",
                    crate::session::Role::Assistant => "assistant",
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let raw: RawSlotExtraction =
            match complete_json(self.llm.as_ref(), &self.model, &system, &transcript).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("slot extraction failed, returning empty patch: {err}");
                    return SlotPatches::default();
                }
            };

        let patches = normalize_extraction(raw, today);
        debug!(
            "slot extraction: {} patch(es), {} note(s)",
            patches.patches.len(),
            patches.notes.len()
        );
        patches
    }

    fn system_prompt(&self, state: &SessionState, today: NaiveDate) -> String {
        let filled = filled_summary(state);
        format!(
            "You extract travel-insurance facts from a conversation. Today is \
             {today}. Reply with a JSON object; every field is optional and \
             carries {{\"value\": ..., \"confidence\": 0.0-1.0}}:\n\
             - destinations: list of country names\n\
             - departure_date, return_date: ISO-8601 dates (resolve relative \
             dates against today)\n\
             - trip_type: \"one_way\" or \"return\"\n\
             - travelers_count: integer\n\
             - traveler_ages: list of integers\n\
             - adventure_sports: whether the trip includes adventure sports\n\
             - adventure_sports_declined: true only if the user explicitly \
             declined to say\n\
             Report only facts stated in the conversation; never guess.\n\
             Already known (do not re-extract unless the user changes them): \
             {filled}"
        )
    }
}

/// Human-readable list of already-filled slots for the don't-re-ask rule.
fn filled_summary(state: &SessionState) -> String {
    let mut parts = Vec::new();
    if !state.trip.destinations.is_empty() {
        parts.push(format!("destinations={}", state.trip.destinations.join("/")));
    }
    if let Some(date) = state.trip.departure_date {
        parts.push(format!("departure_date={date}"));
    }
    if let Some(date) = state.trip.return_date {
        parts.push(format!("return_date={date}"));
    }
    if let Some(count) = state.travelers.count {
        parts.push(format!("travelers_count={count}"));
    }
    if !state.travelers.ages.is_empty() {
        let ages: Vec<String> = state.travelers.ages.iter().map(u32::to_string).collect();
        parts.push(format!("traveler_ages={}", ages.join(",")));
    }
    if let Some(adventure) = state.preferences.adventure_sports {
        parts.push(format!("adventure_sports={adventure}"));
    }
    if parts.is_empty() {
        "nothing yet".to_string()
    } else {
        parts.join(", ")
    }
}

/// Deterministic normalization of a raw extraction into patches.
fn normalize_extraction(raw: RawSlotExtraction, today: NaiveDate) -> SlotPatches {
    let mut result = SlotPatches::default();

    if let Some(destinations) = raw.destinations {
        let (canonical, unknown) = normalize::normalize_destinations(&destinations.value);
        if !canonical.is_empty() {
            result.patches.push(SlotPatch {
                path: "trip.destinations".into(),
                value: serde_json::json!(canonical),
                confidence: destinations.confidence,
            });
        }
        for name in unknown {
            result
                .notes
                .push(format!("I can't quote trips to \"{name}\" yet."));
        }
    }

    for (path, date_field) in [
        ("trip.departure_date", raw.departure_date),
        ("trip.return_date", raw.return_date),
    ] {
        if let Some(field) = date_field {
            match normalize::parse_date(&field.value, today) {
                Some(date) => result.patches.push(SlotPatch {
                    path: path.into(),
                    value: serde_json::json!(date.to_string()),
                    confidence: field.confidence,
                }),
                None => result
                    .notes
                    .push(format!("I couldn't read \"{}\" as a date.", field.value)),
            }
        }
    }

    if let Some(trip_type) = raw.trip_type
        && matches!(trip_type.value.as_str(), "one_way" | "return")
    {
        result.patches.push(SlotPatch {
            path: "trip.trip_type".into(),
            value: serde_json::json!(trip_type.value),
            confidence: trip_type.confidence,
        });
    }

    let mut ages = Vec::new();
    let mut ages_confidence = 1.0;
    if let Some(raw_ages) = raw.traveler_ages {
        ages_confidence = raw_ages.confidence;
        for age in raw_ages.value {
            match normalize::normalize_age(age) {
                Some(valid) => ages.push(valid),
                None => result.notes.push(format!("{age} doesn't look like a traveler age.")),
            }
        }
    }

    let stated_count = raw
        .travelers_count
        .as_ref()
        .and_then(|c| u32::try_from(c.value).ok());
    let (count, contradiction) = normalize::reconcile_travelers(stated_count, &ages);
    if let Some(note) = contradiction {
        result.notes.push(note);
    }
    if let Some(count) = count {
        let confidence = raw
            .travelers_count
            .as_ref()
            .map_or(ages_confidence, |c| c.confidence);
        result.patches.push(SlotPatch {
            path: "travelers.count".into(),
            value: serde_json::json!(count),
            confidence,
        });
    }
    if !ages.is_empty() {
        result.patches.push(SlotPatch {
            path: "travelers.ages".into(),
            value: serde_json::json!(ages),
            confidence: ages_confidence,
        });
    }

    if let Some(adventure) = raw.adventure_sports {
        result.patches.push(SlotPatch {
            path: "preferences.adventure_sports".into(),
            value: serde_json::json!(adventure.value),
            confidence: adventure.confidence,
        });
    } else if let Some(declined) = raw.adventure_sports_declined
        && declined.value
    {
        // Explicit decline defaults the preference to false.
        result.patches.push(SlotPatch {
            path: "preferences.adventure_sports".into(),
            value: serde_json::json!(false),
            confidence: declined.confidence,
        });
        result
            .notes
            .push("I'll assume no adventure sports — say so if that changes.".to_string());
    }

    result
}
