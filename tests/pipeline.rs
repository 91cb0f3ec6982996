//! End-to-end pipeline tests: queue round trips, fallback routing and panic
//! recovery in the worker.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use ocr_pipeline::config::Config;
use ocr_pipeline::db::initialize_schema;
use ocr_pipeline::ocr::{
    FailureKind, OcrEngine, OcrError, OcrService, OcrStatus, PageImage, PageText, PdfConverter,
};
use ocr_pipeline::queue::{
    FallbackQueue, LazyClient, QueueError, QueueManager, QueueService, Receipt, Route, SqsApi,
    SqsMessage, SqsQueueService, StorageProvider,
};
use ocr_pipeline::state::AppState;
use ocr_pipeline::storage::{LocalStorage, StorageRegistry, StorageService};
use ocr_pipeline::worker::OcrWorker;

/// In-memory SQS
#[derive(Default)]
struct MemorySqs {
    messages: Mutex<VecDeque<SqsMessage>>,
    deleted: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
}

#[async_trait]
impl SqsApi for MemorySqs {
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        Ok(format!("http://sqs.local/000000000000/{}", queue_name))
    }

    async fn send(&self, _queue_url: &str, body: String) -> Result<Option<String>, QueueError> {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        self.messages.lock().push_back(SqsMessage {
            body,
            receipt_handle: format!("receipt-{}", next_id),
        });
        Ok(Some(format!("msg-{}", next_id)))
    }

    async fn receive(&self, _queue_url: &str) -> Result<Option<SqsMessage>, QueueError> {
        Ok(self.messages.lock().pop_front())
    }

    async fn delete(&self, _queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().push(receipt_handle.to_string());
        Ok(())
    }
}

struct PanickingEngine;

#[async_trait]
impl OcrEngine for PanickingEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn process_image(&self, _image: &DynamicImage) -> Result<PageText, OcrError> {
        panic!("engine exploded");
    }
}

struct NoPdf;

#[async_trait]
impl PdfConverter for NoPdf {
    async fn convert_pdf_to_images(&self, _pdf: &[u8]) -> Result<Vec<PageImage>, OcrError> {
        Err(OcrError::PdfConversion("not available".to_string()))
    }
}

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    initialize_schema(&pool).await.unwrap();
    pool
}

fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(8, 8))
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn manager_with(queue: Arc<dyn QueueService>) -> QueueManager {
    QueueManager::new(move |_: StorageProvider| -> Result<Arc<dyn QueueService>, QueueError> {
        Ok(queue.clone())
    })
}

#[tokio::test]
async fn enqueue_then_dequeue_roundtrips_through_sqs() {
    let sqs = Arc::new(MemorySqs::default());
    let api: Arc<dyn SqsApi> = sqs.clone();
    let queue = SqsQueueService::new(LazyClient::ready("sqs", api), "ocr-tasks-queue");
    let manager = manager_with(Arc::new(queue));
    let cancel = CancellationToken::new();

    let delivery = manager
        .enqueue_ocr_task("invoice.pdf", StorageProvider::S3)
        .await
        .unwrap();
    assert_eq!(delivery.route, Route::Primary);
    assert_eq!(delivery.message_id.as_deref(), Some("msg-1"));

    let dequeued = manager
        .dequeue_ocr_task(StorageProvider::S3, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dequeued.task.filename, "invoice.pdf");
    assert_eq!(dequeued.task.storage_provider, "s3");
    assert_eq!(dequeued.receipt, Receipt::Sqs("receipt-1".to_string()));

    manager
        .complete_ocr_task(StorageProvider::S3, &dequeued)
        .await
        .unwrap();
    assert_eq!(*sqs.deleted.lock(), vec!["receipt-1".to_string()]);
}

#[tokio::test]
async fn unreachable_primary_routes_through_fallback() {
    let client: LazyClient<dyn SqsApi> = LazyClient::unavailable("sqs", "connection refused");
    let manager = manager_with(Arc::new(SqsQueueService::new(client, "ocr-tasks-queue")));
    let cancel = CancellationToken::new();

    let delivery = manager
        .enqueue_ocr_task("photo.jpg", StorageProvider::S3)
        .await
        .unwrap();
    assert_eq!(delivery.route, Route::Fallback);

    let dequeued = manager
        .dequeue_ocr_task(StorageProvider::S3, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dequeued.route, Route::Fallback);
    assert_eq!(dequeued.task.filename, "photo.jpg");
    assert_eq!(dequeued.task.storage_provider, "s3");
}

#[tokio::test]
async fn panic_during_processing_persists_one_failed_result() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path());
    storage.upload("x.png", png_bytes()).await.unwrap();

    let registry = StorageRegistry::new().with(StorageProvider::S3, Arc::new(storage));
    let ocr = OcrService::new(Arc::new(NoPdf)).with_engine(Arc::new(PanickingEngine));
    let state = AppState::new(
        Config::default(),
        pool,
        manager_with(Arc::new(FallbackQueue::default())),
        registry,
        ocr,
    );

    state
        .queue_manager()
        .enqueue_ocr_task("x.png", StorageProvider::S3)
        .await
        .unwrap();
    let dequeued = state
        .queue_manager()
        .dequeue_ocr_task(StorageProvider::S3, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    OcrWorker::new(state.clone(), StorageProvider::S3)
        .handle(dequeued)
        .await;

    let results = state
        .ocr_results()
        .get_ocr_comparison("x.png", "s3")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert_eq!(result.status, OcrStatus::Failed);
    assert_eq!(result.error_kind, Some(FailureKind::Panic));
    let error = result.error.as_deref().unwrap_or_default();
    assert!(!error.is_empty());
    assert!(error.contains("engine exploded"));

    let stats = state.queue_tasks().get_queue_stats("s3").await.unwrap();
    assert_eq!(stats.failed, 1);
}
