//! OCR Service
//!
//! Dispatches documents to the registered engines by file type.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;

use crate::config::OcrConfig;
use crate::storage::{file_extension, IMAGE_EXTENSIONS};

use super::easyocr::EasyOcrEngine;
use super::engine::OcrEngine;
use super::pdf::{PageImage, PdfConverter, PdftoppmConverter};
use super::tesseract::TesseractEngine;
use super::types::{FailureKind, OcrError, OcrPage, OcrResult};

/// Decoded document content, shared by every engine
enum Document {
    Image(DynamicImage),
    Pages(Vec<PageImage>),
}

/// OCR service with multiple engines
pub struct OcrService {
    engines: Vec<Arc<dyn OcrEngine>>,
    pdf: Arc<dyn PdfConverter>,
}

impl OcrService {
    pub fn new(pdf: Arc<dyn PdfConverter>) -> Self {
        Self {
            engines: Vec::new(),
            pdf,
        }
    }

    /// Tesseract and EasyOCR with `pdftoppm` rasterisation
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(Arc::new(PdftoppmConverter::new(config.pdf_dpi)))
            .with_engine(Arc::new(TesseractEngine::new(&config.tesseract_language)))
            .with_engine(Arc::new(EasyOcrEngine::new(
                &config.easyocr_script_path,
                &config.easyocr_languages,
                Duration::from_secs(config.easyocr_timeout_secs),
            )))
    }

    /// Register an engine, replacing one with the same name
    pub fn with_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engines.retain(|e| e.name() != engine.name());
        self.engines.push(engine);
        self
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    fn engine(&self, name: &str) -> Option<&Arc<dyn OcrEngine>> {
        self.engines.iter().find(|e| e.name() == name)
    }

    /// Run every requested engine over a document, one result per engine.
    ///
    /// Failures are reported as failed results rather than errors.
    pub async fn process_document(
        &self,
        filename: &str,
        storage_provider: &str,
        content: &[u8],
        engines: &[String],
    ) -> Vec<OcrResult> {
        let document = match self.decode(filename, content).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Cannot OCR {}: {}", filename, e);
                return engines
                    .iter()
                    .map(|name| OcrResult::failed(filename, storage_provider, name, e.kind(), e.to_string()))
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(engines.len());
        for name in engines {
            let Some(engine) = self.engine(name) else {
                let e = OcrError::UnknownEngine(name.clone());
                results.push(OcrResult::failed(filename, storage_provider, name, e.kind(), e.to_string()));
                continue;
            };

            let result = match &document {
                Document::Image(image) => match engine.process_image(image).await {
                    Ok(page) => OcrResult::completed(
                        filename,
                        storage_provider,
                        name,
                        vec![OcrPage::new(1, page.text, page.confidence)],
                    ),
                    Err(e) => OcrResult::failed(filename, storage_provider, name, e.kind(), e.to_string()),
                },
                Document::Pages(pages) => {
                    process_pages(engine.as_ref(), filename, storage_provider, pages).await
                }
            };

            tracing::info!(
                "OCR {} with {}: status={}, pages={}, confidence={:.2}",
                filename,
                name,
                result.status,
                result.pages.len(),
                result.confidence
            );
            results.push(result);
        }

        results
    }

    /// Reject files that are neither a PDF nor a supported image
    pub fn ensure_supported(&self, filename: &str) -> Result<(), OcrError> {
        let ext = file_extension(filename).unwrap_or_default();
        if ext == "pdf" || IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(())
        } else {
            Err(OcrError::UnsupportedFileType(ext))
        }
    }

    async fn decode(&self, filename: &str, content: &[u8]) -> Result<Document, OcrError> {
        self.ensure_supported(filename)?;

        if file_extension(filename).as_deref() == Some("pdf") {
            return Ok(Document::Pages(self.pdf.convert_pdf_to_images(content).await?));
        }

        let image = image::load_from_memory(content).map_err(|e| OcrError::Decode(e.to_string()))?;
        Ok(Document::Image(image))
    }
}

/// OCR each page; unreadable pages become empty pages. Failed only when no
/// page could be read.
async fn process_pages(
    engine: &dyn OcrEngine,
    filename: &str,
    storage_provider: &str,
    pages: &[PageImage],
) -> OcrResult {
    let mut out = Vec::with_capacity(pages.len());
    let mut succeeded = 0usize;
    let mut last_error: Option<OcrError> = None;

    for (index, page) in pages.iter().enumerate() {
        let number = index as u32 + 1;

        let recognised = match page {
            Ok(image) => engine.process_image(image).await,
            Err(e) => Err(e.clone()),
        };

        match recognised {
            Ok(text) => {
                out.push(OcrPage::new(number, text.text, text.confidence));
                succeeded += 1;
            }
            Err(e) => {
                tracing::warn!("Page {} of {} failed with {}: {}", number, filename, engine.name(), e);
                out.push(OcrPage::empty(number));
                last_error = Some(e);
            }
        }
    }

    if succeeded == 0 {
        let (kind, message) = match last_error {
            Some(e) => (e.kind(), format!("No pages could be processed: {}", e)),
            None => (FailureKind::Decode, "PDF has no pages".to_string()),
        };
        return OcrResult::failed(filename, storage_provider, engine.name(), kind, message);
    }

    OcrResult::completed(filename, storage_provider, engine.name(), out)
}
