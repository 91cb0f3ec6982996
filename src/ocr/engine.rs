//! OCR engine trait

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;

use super::types::{OcrError, PageText};

/// Recognises text on a single page image
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name stored with every result
    fn name(&self) -> &str;

    async fn process_image(&self, image: &DynamicImage) -> Result<PageText, OcrError>;
}

/// Write an image to a temporary PNG for command-line engines
pub(crate) fn write_temp_png(image: &DynamicImage) -> Result<NamedTempFile, OcrError> {
    let file = tempfile::Builder::new()
        .prefix("ocr_input_")
        .suffix(".png")
        .tempfile()
        .map_err(|e| OcrError::ProcessingError(format!("Failed to create temp file: {}", e)))?;

    image
        .save_with_format(file.path(), ImageFormat::Png)
        .map_err(|e| OcrError::ProcessingError(format!("Failed to write temp image: {}", e)))?;

    Ok(file)
}
