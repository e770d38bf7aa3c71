//! Slot merging: free-text patches, document facts, and tie-breaks.
//!
//! Merge rules:
//! - User-sourced patches always stick (and count as user-confirmed).
//! - Document fields merge iff the slot is empty or the new value's
//!   confidence beats the stored provenance; equal confidence breaks by
//!   upload recency, then by user confirmation.
//! - Destinations are unioned preserving first-seen order, never replaced.
//! - An itinerary reporting adventure activities at ≥ 0.80 confidence sets
//!   the adventure-sports preference automatically, with a notice.

use crate::docs::{DocumentType, ExtractedDocument, LOW_CONFIDENCE, value_at_path};
use crate::insurer::countries::canonical_country;
use crate::pricing::TripType;
use crate::session::{PendingReview, Provenance, SessionState, SlotSource};
use crate::slots::{SlotPatch, SlotPatches, normalize};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Outcome of merging a document into state.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Slot paths that were filled or replaced.
    pub merged_paths: Vec<String>,
    /// User-facing notices (adventure auto-set, contradictions).
    pub notices: Vec<String>,
}

// ── Free-text patches ──────────────────────────────────────────────

/// Apply extractor patches as user-sourced values. User statements always
/// win and are marked confirmed.
pub fn apply_user_patches(
    state: &mut SessionState,
    patches: &SlotPatches,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut applied = Vec::new();
    for patch in &patches.patches {
        if set_slot(state, &patch.path, &patch.value) {
            let mut provenance = Provenance::user(patch.confidence);
            provenance.confirmed_at = Some(now);
            state.provenance.insert(patch.path.clone(), provenance);
            applied.push(patch.path.clone());
        }
    }
    if !applied.is_empty() {
        debug!("applied user patches: {}", applied.join(", "));
    }
    applied
}

// ── Document merges ────────────────────────────────────────────────

/// Merge a processed document into state: high-confidence fields flow into
/// slots under the tie-break rules; low-confidence fields queue for user
/// review; the itinerary adventure rule fires regardless of bucket.
pub fn merge_document(
    state: &mut SessionState,
    document: &ExtractedDocument,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for field_path in &document.high_confidence_fields {
        let confidence = document
            .field_confidences
            .get(field_path)
            .copied()
            .unwrap_or(0.0);
        let Some((slot_path, value)) = slot_patch_for(document, field_path) else {
            continue;
        };
        if merge_wins(state, &slot_path, confidence, document.extracted_at)
            && set_slot(state, &slot_path, &value)
        {
            state.provenance.insert(
                slot_path.clone(),
                Provenance::document(confidence, document.extracted_at),
            );
            outcome.merged_paths.push(slot_path);
        }
    }

    apply_adventure_rule(state, document, &mut outcome);

    if !document.low_confidence_fields.is_empty() {
        state.pending_review = Some(PendingReview {
            document_id: document.id.clone(),
            fields: document.low_confidence_fields.clone(),
        });
    }

    debug!(
        "merged {} ({}): {} slot(s), {} notice(s), {} field(s) for review",
        document.source_filename,
        document.document_type,
        outcome.merged_paths.len(),
        outcome.notices.len(),
        document.low_confidence_fields.len()
    );
    outcome
}

/// Promote a reviewed document's low-confidence fields into slots after
/// the user confirms them.
pub fn confirm_reviewed_fields(
    state: &mut SessionState,
    document_id: &str,
    now: DateTime<Utc>,
) -> Vec<String> {
    let Some(document) = state
        .document_data
        .iter()
        .find(|d| d.id == document_id)
        .cloned()
    else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for field_path in &document.low_confidence_fields {
        let Some((slot_path, value)) = slot_patch_for(&document, field_path) else {
            continue;
        };
        if set_slot(state, &slot_path, &value) {
            let mut provenance = Provenance::document(1.0, document.extracted_at);
            provenance.confirmed_at = Some(now);
            state.provenance.insert(slot_path.clone(), provenance);
            merged.push(slot_path);
        }
    }
    merged
}

/// The itinerary adventure-sports rule: reported adventure activities at
/// ≥ 0.80 confidence set the preference automatically.
fn apply_adventure_rule(
    state: &mut SessionState,
    document: &ExtractedDocument,
    outcome: &mut MergeOutcome,
) {
    if document.document_type != DocumentType::Itinerary {
        return;
    }
    let reported = value_at_path(&document.structured_fields, "has_adventure_sports")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let confidence = document
        .field_confidences
        .get("has_adventure_sports")
        .copied()
        .unwrap_or(0.0);
    if reported && confidence >= LOW_CONFIDENCE && state.preferences.adventure_sports != Some(true)
    {
        state.preferences.adventure_sports = Some(true);
        let mut provenance = Provenance::document(confidence, document.extracted_at);
        provenance.confirmed_at = None;
        state
            .provenance
            .insert("preferences.adventure_sports".into(), provenance);
        outcome
            .merged_paths
            .push("preferences.adventure_sports".into());

        let activities = value_at_path(&document.structured_fields, "adventure_sports_activities")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let detail = if activities.is_empty() {
            "adventure activities".to_string()
        } else {
            activities
        };
        outcome.notices.push(format!(
            "Your itinerary mentions {detail}, so I've included adventure-sports cover. The standard tier doesn't include it."
        ));
    }
}

/// Tie-break: does a new document value at `confidence` beat the stored
/// provenance? Empty slots always lose to any value.
fn merge_wins(
    state: &SessionState,
    slot_path: &str,
    confidence: f64,
    uploaded_at: DateTime<Utc>,
) -> bool {
    // Destinations union rather than replace, so a new document always
    // contributes.
    if slot_path == "trip.destinations" {
        return true;
    }
    let Some(stored) = state.provenance.get(slot_path) else {
        return slot_is_empty(state, slot_path);
    };
    if confidence != stored.confidence {
        return confidence > stored.confidence;
    }
    // Equal confidence: newer upload wins; a user-confirmed value beats an
    // unconfirmed one of the same vintage.
    match stored.source {
        SlotSource::Document { uploaded_at: stored_at } => {
            if uploaded_at != stored_at {
                uploaded_at > stored_at
            } else {
                stored.confirmed_at.is_none()
            }
        }
        SlotSource::User => false,
    }
}

fn slot_is_empty(state: &SessionState, slot_path: &str) -> bool {
    match slot_path {
        "trip.destinations" => state.trip.destinations.is_empty(),
        "trip.departure_date" => state.trip.departure_date.is_none(),
        "trip.return_date" => state.trip.return_date.is_none(),
        "trip.trip_type" => state.trip.trip_type.is_none(),
        "travelers.count" => state.travelers.count.is_none(),
        "travelers.ages" => state.travelers.ages.is_empty(),
        "preferences.adventure_sports" => state.preferences.adventure_sports.is_none(),
        _ => false,
    }
}

/// Map a document field path to a slot patch.
fn slot_patch_for(
    document: &ExtractedDocument,
    field_path: &str,
) -> Option<(String, serde_json::Value)> {
    let fields = &document.structured_fields;
    let value = value_at_path(fields, field_path)?.clone();

    let mapping = match (document.document_type, field_path) {
        (DocumentType::FlightConfirmation, "destination.country") => destination_patch(&value),
        (DocumentType::FlightConfirmation, "departure.date") => {
            Some(("trip.departure_date".into(), value))
        }
        (DocumentType::FlightConfirmation, "return.date") => {
            Some(("trip.return_date".into(), value))
        }
        (DocumentType::FlightConfirmation, "trip_type") => Some(("trip.trip_type".into(), value)),
        (DocumentType::FlightConfirmation, "travelers") => {
            let count = value.as_array()?.len();
            (count > 0).then(|| ("travelers.count".into(), serde_json::json!(count)))
        }
        (DocumentType::HotelBooking, "address.country") => destination_patch(&value),
        (DocumentType::HotelBooking, "check_in_date") => {
            Some(("trip.departure_date".into(), value))
        }
        (DocumentType::HotelBooking, "check_out_date") => Some(("trip.return_date".into(), value)),
        (DocumentType::HotelBooking, "guests") => Some(("travelers.count".into(), value)),
        (DocumentType::VisaApplication, "destination_country") => destination_patch(&value),
        (DocumentType::VisaApplication, "intended_arrival_date") => {
            Some(("trip.departure_date".into(), value))
        }
        (DocumentType::VisaApplication, "intended_departure_date") => {
            Some(("trip.return_date".into(), value))
        }
        (DocumentType::Itinerary, "destinations") => {
            let countries: Vec<String> = value
                .as_array()?
                .iter()
                .filter_map(|stop| stop.get("country").and_then(|c| c.as_str()))
                .filter_map(|name| canonical_country(name).map(String::from))
                .collect();
            (!countries.is_empty())
                .then(|| ("trip.destinations".into(), serde_json::json!(countries)))
        }
        (DocumentType::Itinerary, "start_date") => Some(("trip.departure_date".into(), value)),
        (DocumentType::Itinerary, "end_date") => Some(("trip.return_date".into(), value)),
        _ => None,
    };
    mapping
}

fn destination_patch(value: &serde_json::Value) -> Option<(String, serde_json::Value)> {
    let name = value.as_str()?;
    let canonical = canonical_country(name)?;
    Some(("trip.destinations".into(), serde_json::json!([canonical])))
}

/// Write a value into a slot path. Returns `false` when the value does not
/// fit the slot's type (the caller then skips provenance).
pub fn set_slot(state: &mut SessionState, slot_path: &str, value: &serde_json::Value) -> bool {
    match slot_path {
        "trip.destinations" => {
            let Some(list) = value.as_array() else {
                return false;
            };
            // Union preserving first-seen order.
            let mut changed = false;
            for item in list.iter().filter_map(|v| v.as_str()) {
                let Some(canonical) = canonical_country(item) else {
                    continue;
                };
                if !state.trip.destinations.iter().any(|d| d == canonical) {
                    state.trip.destinations.push(canonical.to_string());
                    changed = true;
                }
            }
            changed || !state.trip.destinations.is_empty()
        }
        "trip.departure_date" => parse_date_value(value)
            .map(|date| state.trip.departure_date = Some(date))
            .is_some(),
        "trip.return_date" => parse_date_value(value)
            .map(|date| state.trip.return_date = Some(date))
            .is_some(),
        "trip.trip_type" => match value.as_str() {
            Some("one_way") => {
                state.trip.trip_type = Some(TripType::OneWay);
                true
            }
            Some("return") => {
                state.trip.trip_type = Some(TripType::Return);
                true
            }
            _ => false,
        },
        "travelers.count" => match value.as_u64() {
            Some(count) if count > 0 => {
                state.travelers.count = Some(count as u32);
                true
            }
            _ => false,
        },
        "travelers.ages" => {
            let Some(list) = value.as_array() else {
                return false;
            };
            let ages: Vec<u32> = list
                .iter()
                .filter_map(|v| v.as_i64())
                .filter_map(normalize::normalize_age)
                .collect();
            if ages.is_empty() {
                return false;
            }
            state.travelers.count = Some(ages.len() as u32);
            state.travelers.ages = ages;
            true
        }
        "preferences.adventure_sports" => match value.as_bool() {
            Some(flag) => {
                state.preferences.adventure_sports = Some(flag);
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn parse_date_value(value: &serde_json::Value) -> Option<chrono::NaiveDate> {
    value
        .as_str()
        .and_then(|text| chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
}
