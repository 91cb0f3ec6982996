//! EasyOCR engine
//!
//! Runs an external Python script per image. The script prints
//! `{"text": ..., "confidence": ..., "error": ...}` as JSON.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;

use super::engine::{write_temp_png, OcrEngine};
use super::types::{OcrError, PageText};

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    error: Option<String>,
}

pub struct EasyOcrEngine {
    interpreter: String,
    script_path: String,
    languages: String,
    timeout: Duration,
}

impl EasyOcrEngine {
    pub fn new(script_path: &str, languages: &str, timeout: Duration) -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_path: script_path.to_string(),
            languages: languages.to_string(),
            timeout,
        }
    }

    /// Override the interpreter the script is run with
    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_string();
        self
    }
}

#[async_trait]
impl OcrEngine for EasyOcrEngine {
    fn name(&self) -> &str {
        "easyocr"
    }

    async fn process_image(&self, image: &DynamicImage) -> Result<PageText, OcrError> {
        let input = write_temp_png(image)?;

        let mut command = tokio::process::Command::new(&self.interpreter);
        command
            .arg(&self.script_path)
            .arg(input.path())
            .arg(&self.languages)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| OcrError::Timeout(self.timeout))?
            .map_err(|e| OcrError::ProcessingError(format!("Failed to run EasyOCR: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = serde_json::from_str::<ScriptOutput>(stderr.trim())
                .ok()
                .and_then(|out| out.error)
                .unwrap_or_else(|| stderr.trim().to_string());
            return Err(OcrError::ProcessingError(format!("EasyOCR failed: {}", message)));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub(crate) fn parse_output(stdout: &str) -> Result<PageText, OcrError> {
    let output: ScriptOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| OcrError::ProcessingError(format!("Invalid EasyOCR output: {}", e)))?;

    if let Some(error) = output.error.filter(|e| !e.is_empty()) {
        return Err(OcrError::ProcessingError(format!("EasyOCR error: {}", error)));
    }

    Ok(PageText {
        text: output.text.trim().to_string(),
        confidence: output.confidence.clamp(0.0, 1.0),
    })
}
