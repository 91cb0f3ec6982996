//! OCR API
//!
//! Caller-facing operations: upload and queue documents, read back results
//! and queue statistics. Transport layers wrap this.

use chrono::Utc;

use crate::db::QueueStats;
use crate::error::{AppError, Result};
use crate::ocr::OcrResult;
use crate::queue::StorageProvider;
use crate::state::AppState;
use crate::storage::UploadStatus;

/// Engine used when a caller does not name one
pub const DEFAULT_ENGINE: &str = "tesseract";

#[derive(Clone)]
pub struct OcrApi {
    state: AppState,
}

impl OcrApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Store a document, record where it went and queue it for OCR.
    /// Returns the upload status and the task id.
    pub async fn upload_document(
        &self,
        filename: &str,
        provider: &str,
        data: Vec<u8>,
    ) -> Result<(UploadStatus, String)> {
        let provider = parse_provider(provider)?;
        let storage = self.state.storage().get(provider)?;

        let status = storage.upload(filename, data).await?;
        self.state
            .file_metadata()
            .record_at(filename, provider.as_str(), &status.storage_path, status.size)
            .await?;

        let task_id = self.enqueue(filename, provider).await?;
        Ok((status, task_id))
    }

    /// Queue an already stored file; returns `<filename>_<provider>_<unix>`
    pub async fn process_ocr(&self, filename: &str, provider: &str) -> Result<String> {
        let provider = parse_provider(provider)?;
        self.enqueue(filename, provider).await
    }

    /// One engine's result; `engine` defaults to [`DEFAULT_ENGINE`]
    pub async fn get_ocr_result(
        &self,
        filename: &str,
        provider: &str,
        engine: Option<&str>,
    ) -> Result<OcrResult> {
        let engine = engine.unwrap_or(DEFAULT_ENGINE);

        self.state
            .ocr_results()
            .get_ocr_result(filename, provider, engine)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("OCR result for {} ({}, {})", filename, provider, engine))
            })
    }

    pub async fn list_ocr_results(&self, provider: &str) -> Result<Vec<OcrResult>> {
        self.state.ocr_results().list_ocr_results(provider).await
    }

    /// Every engine's result for a file, ordered by engine name
    pub async fn compare_ocr_results(&self, filename: &str, provider: &str) -> Result<Vec<OcrResult>> {
        let results = self
            .state
            .ocr_results()
            .get_ocr_comparison(filename, provider)
            .await?;

        if results.is_empty() {
            return Err(AppError::NotFound(format!("OCR results for {} ({})", filename, provider)));
        }
        Ok(results)
    }

    pub async fn queue_stats(&self, provider: &str) -> Result<QueueStats> {
        self.state.queue_tasks().get_queue_stats(provider).await
    }

    async fn enqueue(&self, filename: &str, provider: StorageProvider) -> Result<String> {
        let delivery = self
            .state
            .queue_manager()
            .enqueue_ocr_task(filename, provider)
            .await?;

        let task_id = format!("{}_{}_{}", filename, provider, Utc::now().timestamp());
        tracing::info!("Queued {} as task {} via {:?}", filename, task_id, delivery.route);
        Ok(task_id)
    }
}

fn parse_provider(provider: &str) -> Result<StorageProvider> {
    provider
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Unsupported storage provider: {}", provider)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::setup_test_db;
    use crate::ocr::test_support::BlankPdf;
    use crate::ocr::{FailureKind, OcrPage, OcrService};
    use crate::queue::{FallbackQueue, QueueError, QueueManager, QueueService};
    use crate::storage::{LocalStorage, StorageRegistry};
    use std::sync::Arc;

    async fn api(root: &std::path::Path) -> OcrApi {
        let pool = setup_test_db().await;
        let manager = QueueManager::new(
            |_: StorageProvider| -> std::result::Result<Arc<dyn QueueService>, QueueError> {
                Ok(Arc::new(FallbackQueue::default()))
            },
        );
        let storage = StorageRegistry::new().with(StorageProvider::S3, Arc::new(LocalStorage::new(root)));
        let ocr = OcrService::new(Arc::new(BlankPdf(0)));
        OcrApi::new(AppState::new(Config::default(), pool, manager, storage, ocr))
    }

    #[tokio::test]
    async fn test_process_ocr_task_id_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path()).await;

        let task_id = api.process_ocr("scan.pdf", "s3").await.unwrap();
        assert!(task_id.starts_with("scan.pdf_s3_"));
        assert!(task_id.rsplit('_').next().unwrap().parse::<i64>().is_ok());

        let stats = api.queue_stats("s3").await.unwrap();
        assert_eq!(stats.enqueued, 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path()).await;

        let err = api.process_ocr("scan.pdf", "dropbox").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_upload_records_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path()).await;

        let (status, _) = api
            .upload_document("report.pdf", "s3", b"%PDF-1.4".to_vec())
            .await
            .unwrap();
        assert_eq!(status.storage_path, "documents/report.pdf");

        let metadata = api
            .state
            .file_metadata()
            .find_by_filename("report.pdf", "s3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.storage_path, "documents/report.pdf");
        assert_eq!(metadata.size, 8);
    }

    #[tokio::test]
    async fn test_result_lookup_defaults_to_tesseract() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path()).await;
        let repo = api.state.ocr_results();

        repo.save_ocr_result(&OcrResult::completed(
            "a.png",
            "s3",
            "tesseract",
            vec![OcrPage::new(1, "hello", 0.8)],
        ))
        .await
        .unwrap();
        repo.save_ocr_result(&OcrResult::failed("a.png", "s3", "easyocr", FailureKind::Engine, "boom"))
            .await
            .unwrap();

        let result = api.get_ocr_result("a.png", "s3", None).await.unwrap();
        assert_eq!(result.extracted_text, "hello");

        let compared = api.compare_ocr_results("a.png", "s3").await.unwrap();
        let engines: Vec<&str> = compared.iter().map(|r| r.engine_name.as_str()).collect();
        assert_eq!(engines, vec!["easyocr", "tesseract"]);

        assert!(matches!(
            api.get_ocr_result("b.png", "s3", Some("easyocr")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            api.compare_ocr_results("b.png", "s3").await,
            Err(AppError::NotFound(_))
        ));
    }
}
