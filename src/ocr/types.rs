//! OCR Types
//!
//! Results, pages and failure classification shared by the engines, the
//! repository and the worker.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a stored OCR result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrStatus {
    Processing,
    Completed,
    Failed,
}

impl OcrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OcrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown OCR status: {}", other)),
        }
    }
}

impl fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a task failed; stored with failed results and in the error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Storage,
    Decode,
    Engine,
    Persistence,
    Panic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage_error",
            Self::Decode => "decode_error",
            Self::Engine => "ocr_error",
            Self::Persistence => "db_error",
            Self::Panic => "panic",
        }
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage_error" => Ok(Self::Storage),
            "decode_error" => Ok(Self::Decode),
            "ocr_error" => Ok(Self::Engine),
            "db_error" => Ok(Self::Persistence),
            "panic" => Ok(Self::Panic),
            other => Err(format!("unknown failure kind: {}", other)),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognised page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 1-indexed
    pub page_number: u32,
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f64,
}

impl OcrPage {
    pub fn new(page_number: u32, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            page_number,
            text: text.into(),
            confidence,
        }
    }

    /// Placeholder for a page the engine could not read
    pub fn empty(page_number: u32) -> Self {
        Self::new(page_number, "", 0.0)
    }
}

/// Text recognised on a single image
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f64,
}

/// OCR output of one engine over one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub filename: String,
    pub storage_provider: String,
    pub engine_name: String,
    pub status: OcrStatus,
    pub extracted_text: String,
    pub pages: Vec<OcrPage>,
    /// Mean confidence, 0.0 - 1.0
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
}

impl OcrResult {
    pub fn completed(
        filename: &str,
        storage_provider: &str,
        engine_name: &str,
        pages: Vec<OcrPage>,
    ) -> Self {
        let mut result = Self::new(filename, storage_provider, engine_name, OcrStatus::Completed);
        result.extracted_text = join_page_text(&pages);
        result.confidence = mean_confidence(&pages);
        result.pages = pages;
        result
    }

    pub fn failed(
        filename: &str,
        storage_provider: &str,
        engine_name: &str,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(filename, storage_provider, engine_name, OcrStatus::Failed);
        result.error = Some(error.into());
        result.error_kind = Some(kind);
        result
    }

    fn new(filename: &str, storage_provider: &str, engine_name: &str, status: OcrStatus) -> Self {
        Self {
            filename: filename.to_string(),
            storage_provider: storage_provider.to_string(),
            engine_name: engine_name.to_string(),
            status,
            extracted_text: String::new(),
            pages: Vec::new(),
            confidence: 0.0,
            processed_at: Utc::now(),
            error: None,
            error_kind: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == OcrStatus::Failed
    }
}

/// Page texts joined by newlines, trimmed
pub fn join_page_text(pages: &[OcrPage]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Arithmetic mean of page confidences, 0.0 when there are no pages
pub fn mean_confidence(pages: &[OcrPage]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }
    pages.iter().map(|p| p.confidence).sum::<f64>() / pages.len() as f64
}

/// OCR engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcrError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Engine not registered: {0}")]
    UnknownEngine(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("PDF conversion failed: {0}")]
    PdfConversion(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),
}

impl OcrError {
    /// Failure classification for a result carrying this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Decode(_) | Self::PdfConversion(_) | Self::UnsupportedFileType(_) => {
                FailureKind::Decode
            }
            Self::UnknownEngine(_) | Self::ProcessingError(_) | Self::Timeout(_) => {
                FailureKind::Engine
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_derives_text_and_confidence() {
        let pages = vec![OcrPage::new(1, "a", 0.9), OcrPage::new(2, "b", 0.7)];
        let result = OcrResult::completed("f.pdf", "s3", "tesseract", pages);

        assert_eq!(result.extracted_text, "a\nb");
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.status, OcrStatus::Completed);
    }

    #[test]
    fn test_failed_result() {
        let result = OcrResult::failed("x.png", "s3", "tesseract", FailureKind::Panic, "boom");
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.error_kind, Some(FailureKind::Panic));
    }

    #[test]
    fn test_failure_kind_strings() {
        for kind in [
            FailureKind::Storage,
            FailureKind::Decode,
            FailureKind::Engine,
            FailureKind::Persistence,
            FailureKind::Panic,
        ] {
            assert_eq!(kind.as_str().parse::<FailureKind>().unwrap(), kind);
        }
        assert_eq!(FailureKind::Engine.as_str(), "ocr_error");
    }

    #[test]
    fn test_mean_confidence_empty() {
        assert_eq!(mean_confidence(&[]), 0.0);
        assert_eq!(join_page_text(&[]), "");
    }
}
