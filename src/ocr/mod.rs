//! OCR module
//!
//! Engines, PDF rasterisation and the dispatching service.

mod easyocr;
mod engine;
mod pdf;
mod service;
mod tesseract;
mod types;

pub use easyocr::EasyOcrEngine;
pub use engine::OcrEngine;
pub use pdf::{PageImage, PdfConverter, PdftoppmConverter};
pub use service::OcrService;
pub use tesseract::TesseractEngine;
pub use types::*;

#[cfg(test)]
pub(crate) use service::tests as test_support;
