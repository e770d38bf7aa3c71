//! LLM stages of the document pipeline: type detection and typed
//! extraction.

use super::schema::DocumentType;
use crate::{Error, LlmBackend, Result, complete_json};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Type-detection threshold: below this the document is `unknown`.
pub const TYPE_CONFIDENCE_FLOOR: f64 = 0.6;

/// Maximum characters of OCR text embedded in an LLM prompt.
const PROMPT_TEXT_CAP: usize = 24_000;

/// Classifier reply.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TypeDetection {
    /// One of `flight_confirmation`, `hotel_booking`, `visa_application`,
    /// `itinerary`, `unknown`.
    pub document_type: String,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
}

/// Detect the document type from OCR text.
///
/// Confidence below [`TYPE_CONFIDENCE_FLOOR`] degrades to
/// [`DocumentType::Unknown`].
pub async fn detect_type(
    llm: &dyn LlmBackend,
    model: &str,
    text: &str,
) -> Result<(DocumentType, f64)> {
    let system = "You classify travel documents. Reply with a JSON object \
        {\"document_type\": \"...\", \"confidence\": 0.0-1.0}. document_type \
        must be one of: flight_confirmation, hotel_booking, visa_application, \
        itinerary, unknown.";
    let user = format!("Classify this document:\n\n{}", cap_text(text));

    let detection: TypeDetection = complete_json(llm, model, system, &user).await?;
    let confidence = detection.confidence.clamp(0.0, 1.0);
    let doc_type = if confidence < TYPE_CONFIDENCE_FLOOR {
        DocumentType::Unknown
    } else {
        DocumentType::from_label(&detection.document_type)
    };
    debug!(
        "type detection: {} (confidence {:.2})",
        doc_type, confidence
    );
    Ok((doc_type, confidence))
}

/// Typed-extraction reply: a nested field object plus per-field
/// confidences keyed by dotted path.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TypedExtraction {
    pub fields: serde_json::Value,
    pub confidences: BTreeMap<String, f64>,
}

/// Run the type-specific structured extraction.
///
/// The reply's `fields` object is validated against the type's schema;
/// a violation is a [`Error::Parse`].
pub async fn extract_fields(
    llm: &dyn LlmBackend,
    model: &str,
    doc_type: DocumentType,
    text: &str,
) -> Result<TypedExtraction> {
    let schema = doc_type
        .fields_schema()
        .ok_or_else(|| Error::InvalidInput("cannot extract fields for unknown type".into()))?;

    let system = format!(
        "You extract structured data from a {doc_type} document. Reply with a \
         JSON object {{\"fields\": ..., \"confidences\": ...}}. \"fields\" must \
         match this JSON Schema:\n{}\nDates are ISO-8601 calendar dates. \
         \"confidences\" maps each extracted dotted field path to your \
         confidence in [0, 1]. Omit fields you cannot read; never guess.",
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    );
    let user = format!("Extract from this document:\n\n{}", cap_text(text));

    let mut extraction: TypedExtraction = complete_json(llm, model, &system, &user).await?;

    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::Parse(format!("schema compile failed: {e}")))?;
    if let Some(first) = validator.iter_errors(&extraction.fields).next() {
        return Err(Error::Parse(format!(
            "extracted fields violate {doc_type} schema at {}: {first}",
            first.instance_path()
        )));
    }

    for confidence in extraction.confidences.values_mut() {
        *confidence = confidence.clamp(0.0, 1.0);
    }
    if doc_type == DocumentType::FlightConfirmation {
        dedup_travelers(&mut extraction.fields);
    }

    Ok(extraction)
}

/// De-duplicate flight travelers by exact (first, last) pair, preserving
/// first-seen order.
pub fn dedup_travelers(fields: &mut serde_json::Value) {
    let Some(travelers) = fields.get_mut("travelers").and_then(|t| t.as_array_mut()) else {
        return;
    };
    let mut seen = std::collections::BTreeSet::new();
    travelers.retain(|traveler| {
        let key = (
            traveler
                .get("first_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            traveler
                .get("last_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        );
        seen.insert(key)
    });
}

fn cap_text(text: &str) -> String {
    text.chars().take(PROMPT_TEXT_CAP).collect()
}
