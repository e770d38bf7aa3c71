//! Document understanding pipeline.
//!
//! OCR → type detection → type-specific structured extraction → confidence
//! bucketing. The pipeline produces [`ExtractedDocument`] values and never
//! writes them into session state itself — the orchestrator owns the merge.
//!
//! Confidence is the load-bearing signal: every extracted field carries a
//! scalar in [0, 1] and lands in one of three buckets that drive different
//! conversation behavior (silent merge, user confirmation, or a follow-up
//! question).

pub mod bucket;
pub mod extract;
pub mod ocr;
pub mod schema;

pub use bucket::{FieldBuckets, HIGH_CONFIDENCE, LOW_CONFIDENCE, bucket_fields, value_at_path};
pub use ocr::{DocumentBlob, OcrEngine, OcrResult};
pub use schema::DocumentType;

use crate::{Error, LlmBackend, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// OCR confidence floor: a document whose every page reads below this is
/// returned as `unknown` regardless of the type classifier.
pub const OCR_CONFIDENCE_FLOOR: f64 = 0.5;

/// A structured, confidence-scored record extracted from one upload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedDocument {
    pub id: String,
    pub source_filename: String,
    pub document_type: DocumentType,
    pub extracted_at: DateTime<Utc>,
    /// Nested field object; schema is type-specific.
    pub structured_fields: serde_json::Value,
    /// Dotted field path → confidence in [0, 1].
    pub field_confidences: BTreeMap<String, f64>,
    pub high_confidence_fields: Vec<String>,
    pub low_confidence_fields: Vec<String>,
    pub missing_fields: Vec<String>,
    /// SHA-256 of the OCR text.
    pub raw_text_hash: String,
}

impl ExtractedDocument {
    fn apply_buckets(&mut self, buckets: FieldBuckets) {
        self.high_confidence_fields = buckets.high;
        self.low_confidence_fields = buckets.low;
        self.missing_fields = buckets.missing;
    }
}

/// The staged pipeline. Holds the LLM and OCR seams plus limits.
pub struct DocumentPipeline {
    llm: Arc<dyn LlmBackend>,
    ocr: Arc<dyn OcrEngine>,
    model: String,
    max_bytes: usize,
}

impl DocumentPipeline {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        ocr: Arc<dyn OcrEngine>,
        model: impl Into<String>,
        max_bytes: usize,
    ) -> Self {
        Self {
            llm,
            ocr,
            model: model.into(),
            max_bytes,
        }
    }

    /// Run the full pipeline on one uploaded blob.
    pub async fn process(
        &self,
        blob: &DocumentBlob,
        now: DateTime<Utc>,
    ) -> Result<ExtractedDocument> {
        if blob.bytes.len() > self.max_bytes {
            return Err(Error::InputTooLarge {
                what: "document",
                limit: self.max_bytes,
                actual: blob.bytes.len(),
            });
        }

        let ocr_result = self.ocr.recognize(blob).await?;
        let text = ocr_result.full_text();
        let raw_text_hash = hex::encode(Sha256::digest(text.as_bytes()));

        if ocr_result.uniformly_below(OCR_CONFIDENCE_FLOOR) {
            warn!(
                "{}: OCR confidence uniformly below {:.1}, returning unknown",
                blob.filename, OCR_CONFIDENCE_FLOOR
            );
            return Ok(self.unknown_record(blob, now, raw_text_hash));
        }

        let (doc_type, _type_confidence) =
            extract::detect_type(self.llm.as_ref(), &self.model, &text).await?;
        if doc_type == DocumentType::Unknown {
            return Ok(self.unknown_record(blob, now, raw_text_hash));
        }

        let extraction =
            extract::extract_fields(self.llm.as_ref(), &self.model, doc_type, &text).await?;
        let buckets = bucket_fields(
            doc_type.expected_paths(),
            &extraction.confidences,
            &extraction.fields,
        );

        let mut record = ExtractedDocument {
            id: new_document_id(),
            source_filename: blob.filename.clone(),
            document_type: doc_type,
            extracted_at: now,
            structured_fields: extraction.fields,
            field_confidences: extraction.confidences,
            high_confidence_fields: Vec::new(),
            low_confidence_fields: Vec::new(),
            missing_fields: Vec::new(),
            raw_text_hash,
        };
        record.apply_buckets(buckets);
        info!(
            "{}: {} — {} high, {} low, {} missing",
            blob.filename,
            record.document_type,
            record.high_confidence_fields.len(),
            record.low_confidence_fields.len(),
            record.missing_fields.len()
        );
        Ok(record)
    }

    fn unknown_record(
        &self,
        blob: &DocumentBlob,
        now: DateTime<Utc>,
        raw_text_hash: String,
    ) -> ExtractedDocument {
        ExtractedDocument {
            id: new_document_id(),
            source_filename: blob.filename.clone(),
            document_type: DocumentType::Unknown,
            extracted_at: now,
            structured_fields: serde_json::json!({}),
            field_confidences: BTreeMap::new(),
            high_confidence_fields: Vec::new(),
            low_confidence_fields: Vec::new(),
            missing_fields: Vec::new(),
            raw_text_hash,
        }
    }
}

/// Apply a user's field patch to a record and re-bucket.
///
/// Patched leaf paths take the user's value with confidence 1.0 (the user
/// read the document themselves). Used by the document-update endpoint and
/// by the edit path of the review flow.
pub fn apply_field_patch(record: &mut ExtractedDocument, patch: &serde_json::Value) {
    let mut leaf_paths = Vec::new();
    collect_leaf_paths(patch, String::new(), &mut leaf_paths);

    for (path, value) in leaf_paths {
        bucket::set_value_at_path(&mut record.structured_fields, &path, value);
        record.field_confidences.insert(path, 1.0);
    }

    let buckets = bucket_fields(
        record.document_type.expected_paths(),
        &record.field_confidences,
        &record.structured_fields,
    );
    record.apply_buckets(buckets);
}

/// Flatten a nested patch object into (dotted path, value) leaves. Arrays
/// and scalars are leaves; objects recurse.
fn collect_leaf_paths(
    value: &serde_json::Value,
    prefix: String,
    out: &mut Vec<(String, serde_json::Value)>,
) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_leaf_paths(child, path, out);
            }
        }
        _ if prefix.is_empty() => {}
        _ => out.push((prefix, value.clone())),
    }
}

fn new_document_id() -> String {
    format!("doc-{}", uuid::Uuid::new_v4().simple())
}
