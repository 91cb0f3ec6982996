//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{FileMetadataRepository, OcrResultRepository, QueueTaskStore};
use crate::ocr::OcrService;
use crate::queue::QueueManager;
use crate::storage::StorageRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    queue_manager: Arc<QueueManager>,
    storage: StorageRegistry,
    ocr: Arc<OcrService>,
    ocr_results: OcrResultRepository,
    file_metadata: FileMetadataRepository,
    queue_tasks: QueueTaskStore,
}

impl AppState {
    /// Create a new application state
    ///
    /// The queue manager is wired to the task audit log on `db`.
    pub fn new(
        config: Config,
        db: SqlitePool,
        queue_manager: QueueManager,
        storage: StorageRegistry,
        ocr: OcrService,
    ) -> Self {
        let queue_tasks = QueueTaskStore::new(db.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                queue_manager: Arc::new(queue_manager.with_task_store(queue_tasks.clone())),
                storage,
                ocr: Arc::new(ocr),
                ocr_results: OcrResultRepository::new(db.clone()),
                file_metadata: FileMetadataRepository::new(db.clone()),
                queue_tasks,
                db,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn queue_manager(&self) -> &Arc<QueueManager> {
        &self.inner.queue_manager
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.inner.storage
    }

    pub fn ocr(&self) -> &Arc<OcrService> {
        &self.inner.ocr
    }

    pub fn ocr_results(&self) -> &OcrResultRepository {
        &self.inner.ocr_results
    }

    pub fn file_metadata(&self) -> &FileMetadataRepository {
        &self.inner.file_metadata
    }

    pub fn queue_tasks(&self) -> &QueueTaskStore {
        &self.inner.queue_tasks
    }
}
