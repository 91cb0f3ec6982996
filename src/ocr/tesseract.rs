//! Tesseract engine
//!
//! Runs the `tesseract` command in TSV mode so word confidences are
//! available. With the `ocr-tesseract` feature the native library binding is
//! used instead.

use async_trait::async_trait;
use image::DynamicImage;

use super::engine::OcrEngine;
use super::types::{OcrError, PageText};

pub struct TesseractEngine {
    language: String,
}

impl TesseractEngine {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

#[cfg(not(feature = "ocr-tesseract"))]
#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn process_image(&self, image: &DynamicImage) -> Result<PageText, OcrError> {
        let input = super::engine::write_temp_png(image)?;

        let output = tokio::process::Command::new("tesseract")
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("3")
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ProcessingError(format!(
                "Tesseract failed: {}",
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(feature = "ocr-tesseract")]
#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn process_image(&self, image: &DynamicImage) -> Result<PageText, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| OcrError::ProcessingError(format!("Failed to encode image: {}", e)))?;
        let language = self.language.clone();

        tokio::task::spawn_blocking(move || {
            let mut tess = tesseract::Tesseract::new(None, Some(language.as_str()))
                .map_err(|e| OcrError::ProcessingError(e.to_string()))?
                .set_image_from_mem(&png)
                .map_err(|e| OcrError::ProcessingError(e.to_string()))?
                .recognize()
                .map_err(|e| OcrError::ProcessingError(e.to_string()))?;

            let text = tess
                .get_text()
                .map_err(|e| OcrError::ProcessingError(e.to_string()))?;
            let confidence = f64::from(tess.mean_text_conf().max(0)) / 100.0;

            Ok(PageText {
                text: text.trim().to_string(),
                confidence,
            })
        })
        .await
        .map_err(|e| OcrError::ProcessingError(format!("Tesseract task failed: {}", e)))?
    }
}

/// Rebuild text and mean word confidence (0.0 - 1.0) from `tesseract ... tsv` output.
///
/// Columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Only word rows (level 5) carry text.
pub(crate) fn parse_tsv(tsv: &str) -> PageText {
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(u32, u32, u32, u32)> = None;
    let mut confidence_sum = 0.0;
    let mut words = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let text = cols[11].trim();
        let conf: f64 = cols[10].parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );

        if current_line == Some(key) {
            if let Some(line) = lines.last_mut() {
                line.push(' ');
                line.push_str(text);
            }
        } else {
            lines.push(text.to_string());
            current_line = Some(key);
        }

        confidence_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        (confidence_sum / words as f64 / 100.0).clamp(0.0, 1.0)
    };

    PageText {
        text: lines.join("\n"),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_groups_lines() {
        let tsv = [
            HEADER,
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t",
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tHello",
            "5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t80\tworld",
            "5\t1\t1\t1\t2\t1\t0\t0\t10\t10\t70\tSecond",
            "5\t1\t1\t1\t2\t2\t0\t0\t10\t10\t-1\t ",
        ]
        .join("\n");

        let page = parse_tsv(&tsv);
        assert_eq!(page.text, "Hello world\nSecond");
        assert!((page.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let page = parse_tsv(HEADER);
        assert_eq!(page.text, "");
        assert_eq!(page.confidence, 0.0);
    }
}
