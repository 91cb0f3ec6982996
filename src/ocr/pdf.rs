//! PDF rasterisation
//!
//! Renders each PDF page to a PNG with `pdftoppm` and decodes the pages in
//! page order.

use std::path::Path;

use async_trait::async_trait;
use image::DynamicImage;

use super::types::OcrError;

/// One rendered page; a page that could not be decoded carries its error
pub type PageImage = Result<DynamicImage, OcrError>;

#[async_trait]
pub trait PdfConverter: Send + Sync {
    /// Render every page, in page order
    async fn convert_pdf_to_images(&self, pdf: &[u8]) -> Result<Vec<PageImage>, OcrError>;
}

/// Converter backed by poppler's `pdftoppm`
pub struct PdftoppmConverter {
    dpi: u32,
}

impl PdftoppmConverter {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

impl Default for PdftoppmConverter {
    fn default() -> Self {
        Self::new(150)
    }
}

#[async_trait]
impl PdfConverter for PdftoppmConverter {
    async fn convert_pdf_to_images(&self, pdf: &[u8]) -> Result<Vec<PageImage>, OcrError> {
        let workdir = tempfile::Builder::new()
            .prefix("pdf_convert_")
            .tempdir()
            .map_err(|e| OcrError::PdfConversion(format!("Failed to create temp dir: {}", e)))?;

        let input = workdir.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(|e| OcrError::PdfConversion(format!("Failed to write PDF: {}", e)))?;

        let output = tokio::process::Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(&input)
            .arg(workdir.path().join("page"))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::PdfConversion(format!("Failed to run pdftoppm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::PdfConversion(format!(
                "pdftoppm failed: {}",
                stderr.trim()
            )));
        }

        let pages = collect_page_files(workdir.path()).await?;
        tracing::debug!("Rendered {} PDF pages at {} dpi", pages.len(), self.dpi);

        // Decoding is CPU-bound
        tokio::task::spawn_blocking(move || {
            let images = pages
                .into_iter()
                .map(|(_, path)| {
                    image::open(&path)
                        .map_err(|e| OcrError::Decode(format!("{}: {}", path.display(), e)))
                })
                .collect::<Vec<_>>();
            drop(workdir);
            images
        })
        .await
        .map_err(|e| OcrError::PdfConversion(format!("Page decoding task failed: {}", e)))
    }
}

/// `page-N.png` files in `dir`, sorted by N
async fn collect_page_files(dir: &Path) -> Result<Vec<(u32, std::path::PathBuf)>, OcrError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| OcrError::PdfConversion(format!("Failed to read output dir: {}", e)))?;

    let mut pages = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| OcrError::PdfConversion(format!("Failed to read output dir: {}", e)))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(number) = page_number(&name) {
            pages.push((number, entry.path()));
        }
    }

    pages.sort_by_key(|(number, _)| *number);
    Ok(pages)
}

/// Page number from a `pdftoppm` output name such as `page-07.png`
fn page_number(name: &str) -> Option<u32> {
    name.strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number() {
        assert_eq!(page_number("page-1.png"), Some(1));
        assert_eq!(page_number("page-012.png"), Some(12));
        assert_eq!(page_number("input.pdf"), None);
        assert_eq!(page_number("page-x.png"), None);
    }

    #[tokio::test]
    async fn test_collect_page_files_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "input.pdf"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let pages = collect_page_files(dir.path()).await.unwrap();
        let numbers: Vec<u32> = pages.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
    }
}
