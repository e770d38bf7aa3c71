//! OCR stage: raster/PDF bytes to plain text with per-page confidence.

use crate::{BoxFut, Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// An uploaded document blob.
#[derive(Debug, Clone)]
pub struct DocumentBlob {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One recognized page.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrPage {
    pub text: String,
    /// Mean text confidence for the page, in [0, 1].
    pub confidence: f64,
}

/// Full OCR output for a document.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub pages: Vec<OcrPage>,
}

impl OcrResult {
    /// Concatenate pages with page markers.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .enumerate()
            .map(|(i, page)| format!("--- page {} ---\n{}", i + 1, page.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether every page fell below the given confidence floor.
    pub fn uniformly_below(&self, floor: f64) -> bool {
        !self.pages.is_empty() && self.pages.iter().all(|p| p.confidence < floor)
    }
}

/// OCR engine seam. Tests supply a canned implementation.
pub trait OcrEngine: Send + Sync {
    fn recognize<'a>(&'a self, blob: &'a DocumentBlob) -> BoxFut<'a, Result<OcrResult>>;
}

/// OCR engine driven by an external binary.
///
/// The binary is invoked as `<binary> <file>` and must emit a JSON array of
/// `{"page": n, "text": "...", "confidence": 0.93}` records on stdout.
pub struct OcrBinary {
    binary: PathBuf,
}

impl OcrBinary {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Deserialize)]
struct PageRecord {
    #[allow(dead_code)]
    page: u32,
    text: String,
    confidence: f64,
}

impl OcrEngine for OcrBinary {
    fn recognize<'a>(&'a self, blob: &'a DocumentBlob) -> BoxFut<'a, Result<OcrResult>> {
        Box::pin(async move {
            let scratch = std::env::temp_dir().join(format!(
                "tripcover-ocr-{}",
                uuid::Uuid::new_v4().simple()
            ));
            tokio::fs::write(&scratch, &blob.bytes)
                .await
                .map_err(|e| Error::DownstreamUnavailable {
                    service: "ocr",
                    detail: format!("failed to stage upload: {e}"),
                })?;

            let output = tokio::process::Command::new(&self.binary)
                .arg(&scratch)
                .output()
                .await;
            let _ = tokio::fs::remove_file(&scratch).await;

            let output = output.map_err(|e| Error::DownstreamUnavailable {
                service: "ocr",
                detail: format!("failed to run {}: {e}", self.binary.display()),
            })?;

            if !output.status.success() {
                return Err(Error::DownstreamUnavailable {
                    service: "ocr",
                    detail: format!(
                        "{} exited with {}: {}",
                        self.binary.display(),
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    ),
                });
            }

            let records: Vec<PageRecord> = serde_json::from_slice(&output.stdout)
                .map_err(|e| Error::Parse(format!("OCR output: {e}")))?;
            debug!("OCR: {} page(s) from {}", records.len(), blob.filename);

            Ok(OcrResult {
                pages: records
                    .into_iter()
                    .map(|r| OcrPage {
                        text: r.text,
                        confidence: r.confidence,
                    })
                    .collect(),
            })
        })
    }
}
