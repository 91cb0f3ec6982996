//! OCR Worker
//!
//! One polling loop per storage provider. Each task is fetched from storage,
//! run through every configured engine and persisted; the queue message is
//! acknowledged afterwards whatever the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::StorageError;
use crate::ocr::{FailureKind, OcrError, OcrResult};
use crate::queue::{Dequeued, OcrTask, StorageProvider};
use crate::state::AppState;
use crate::storage::StorageService;

/// Why a task produced no OCR output
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("Failed to save OCR result: {0}")]
    Persistence(String),

    #[error("Panic during processing: {0}")]
    Panic(String),

    #[error("No OCR engines configured")]
    NoResults,
}

impl ProcessingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Storage(_) => FailureKind::Storage,
            Self::Ocr(e) => e.kind(),
            Self::Persistence(_) => FailureKind::Persistence,
            Self::Panic(_) => FailureKind::Panic,
            Self::NoResults => FailureKind::Engine,
        }
    }
}

pub struct OcrWorker {
    state: AppState,
    provider: StorageProvider,
}

impl OcrWorker {
    pub fn new(state: AppState, provider: StorageProvider) -> Self {
        Self { state, provider }
    }

    /// Poll until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let worker_config = self.state.config().worker.clone();
        tracing::info!("OCR worker started for provider {}", self.provider);

        while !cancel.is_cancelled() {
            let next = self
                .state
                .queue_manager()
                .dequeue_ocr_task(self.provider, &cancel)
                .await;

            match next {
                Ok(Some(dequeued)) => self.handle(dequeued).await,
                Ok(None) => {
                    if !pause(worker_config.idle_backoff(), &cancel).await {
                        break;
                    }
                }
                Err(_) if cancel.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!("Dequeue failed for provider {}: {}", self.provider, e);
                    if !pause(worker_config.error_backoff(), &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("OCR worker stopped for provider {}", self.provider);
    }

    /// Process, persist and acknowledge one task.
    ///
    /// A panic anywhere in the iteration is recorded as a `panic` failure
    /// and does not escape, so the polling loop keeps running.
    pub async fn handle(&self, dequeued: Dequeued) {
        let task = &dequeued.task;
        let Err(payload) = AssertUnwindSafe(self.handle_task(&dequeued)).catch_unwind().await else {
            return;
        };

        let e = ProcessingError::Panic(panic_message(payload.as_ref()));
        tracing::error!("OCR task for {} panicked: {}", task.filename, e);
        let failure = self.failure_result(task, &e);
        if AssertUnwindSafe(self.persist_failure(&failure)).catch_unwind().await.is_err() {
            tracing::error!("Recording the panic for {} panicked as well", task.filename);
        }
    }

    async fn handle_task(&self, dequeued: &Dequeued) {
        let task = &dequeued.task;
        tracing::info!(
            "Processing OCR task: filename={}, provider={}, route={:?}",
            task.filename,
            task.storage_provider,
            dequeued.route
        );

        let results = match AssertUnwindSafe(self.process(task)).catch_unwind().await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!("OCR task for {} failed: {}", task.filename, e);
                vec![self.failure_result(task, &e)]
            }
            Err(payload) => {
                let e = ProcessingError::Panic(panic_message(payload.as_ref()));
                tracing::error!("OCR task for {} panicked: {}", task.filename, e);
                vec![self.failure_result(task, &e)]
            }
        };

        let mut first_error: Option<String> = None;
        for result in &results {
            if result.is_failed() {
                self.persist_failure(result).await;
                first_error.get_or_insert_with(|| result.error.clone().unwrap_or_default());
            } else if let Err(e) = self.state.ocr_results().save_ocr_result(result).await {
                let e = ProcessingError::Persistence(e.to_string());
                tracing::error!(
                    "Failed to save {} result for {}: {}",
                    result.engine_name,
                    result.filename,
                    e
                );
                self.log_error(result, e.kind(), &e.to_string(), 0).await;
                first_error.get_or_insert_with(|| e.to_string());
            }
        }

        let audit = self.state.queue_tasks();
        let logged = match &first_error {
            None => audit.log_completed(&task.filename, &task.storage_provider).await,
            Some(error) => audit.log_failed(&task.filename, &task.storage_provider, error).await,
        };
        if let Err(e) = logged {
            tracing::warn!("Failed to audit completion of {}: {}", task.filename, e);
        }

        if let Err(e) = self
            .state
            .queue_manager()
            .complete_ocr_task(self.provider, dequeued)
            .await
        {
            tracing::warn!("Failed to acknowledge task for {}: {}", task.filename, e);
        }
    }

    async fn process(&self, task: &OcrTask) -> Result<Vec<OcrResult>, ProcessingError> {
        if let Err(e) = self
            .state
            .queue_tasks()
            .log_processing(&task.filename, &task.storage_provider)
            .await
        {
            tracing::warn!("Failed to audit processing of {}: {}", task.filename, e);
        }

        let ocr = self.state.ocr();
        ocr.ensure_supported(&task.filename)?;

        let engines = &self.state.config().ocr.engines;
        if engines.is_empty() {
            return Err(ProcessingError::NoResults);
        }

        let storage = self.state.storage().get(self.provider)?;
        let content = self.fetch(storage.as_ref(), task).await?;
        tracing::debug!("Fetched {} ({} bytes)", task.filename, content.len());

        let results = ocr
            .process_document(&task.filename, &task.storage_provider, &content, engines)
            .await;

        if results.is_empty() {
            return Err(ProcessingError::NoResults);
        }
        Ok(results)
    }

    /// Prefer the recorded storage path; fall back to the filename-derived one
    async fn fetch(&self, storage: &dyn StorageService, task: &OcrTask) -> Result<Vec<u8>, StorageError> {
        let metadata = match self
            .state
            .file_metadata()
            .find_by_filename(&task.filename, &task.storage_provider)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("File metadata lookup failed for {}: {}", task.filename, e);
                None
            }
        };

        if let Some(metadata) = metadata {
            match storage.download_by_path(&metadata.storage_path).await {
                Ok(content) => return Ok(content),
                Err(e) => tracing::warn!(
                    "Download of {} by path {} failed, retrying by filename: {}",
                    task.filename,
                    metadata.storage_path,
                    e
                ),
            }
        }

        storage.download(&task.filename).await
    }

    /// Failed result recorded under the first configured engine
    fn failure_result(&self, task: &OcrTask, error: &ProcessingError) -> OcrResult {
        let engine = self
            .state
            .config()
            .ocr
            .engines
            .first()
            .map(String::as_str)
            .unwrap_or("tesseract");

        OcrResult::failed(
            &task.filename,
            &task.storage_provider,
            engine,
            error.kind(),
            error.to_string(),
        )
    }

    /// Save a failed result with linear backoff, then log it
    async fn persist_failure(&self, result: &OcrResult) {
        let config = &self.state.config().worker;
        let attempts = config.persist_attempts.max(1);
        let message = result.error.clone().unwrap_or_default();
        let kind = result.error_kind.unwrap_or(FailureKind::Engine);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.state.ocr_results().save_ocr_result(result).await {
                Ok(()) => {
                    self.log_error(result, kind, &message, attempt - 1).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} to save failed result for {} failed: {}",
                        attempt,
                        attempts,
                        result.filename,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(persist_backoff(config, attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            "Giving up saving failed result for {} after {} attempts: {} (original: {})",
            result.filename,
            attempts,
            last_error,
            message
        );
        let message = format!("Failed to save OCR result: {} (original: {})", last_error, message);
        self.log_error(result, FailureKind::Persistence, &message, attempts).await;
    }

    async fn log_error(&self, result: &OcrResult, kind: FailureKind, message: &str, retry_count: u32) {
        if let Err(e) = self
            .state
            .ocr_results()
            .log_error(
                &result.filename,
                &result.storage_provider,
                &result.engine_name,
                kind.as_str(),
                message,
                retry_count,
            )
            .await
        {
            tracing::warn!("Failed to write error log for {}: {}", result.filename, e);
        }
    }
}

/// Delay after the `attempt`-th failed save: grows linearly
fn persist_backoff(config: &WorkerConfig, attempt: u32) -> Duration {
    Duration::from_millis(config.persist_backoff_ms * u64::from(attempt))
}

/// Sleep unless cancelled first; false when cancelled
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
