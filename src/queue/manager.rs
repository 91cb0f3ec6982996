//! Queue Manager
//!
//! Registry of one queue per storage provider. Queues are built on first use
//! through a [`QueueFactory`] and cached for the life of the manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::db::QueueTaskStore;

use super::azure::AzureQueueService;
use super::pubsub::PubSubQueueService;
use super::service::QueueService;
use super::sqs::SqsQueueService;
use super::types::{Delivery, Dequeued, QueueError, StorageProvider};

/// Builds the queue backend for a provider
pub trait QueueFactory: Send + Sync {
    fn create(&self, provider: StorageProvider) -> Result<Arc<dyn QueueService>, QueueError>;
}

impl<F> QueueFactory for F
where
    F: Fn(StorageProvider) -> Result<Arc<dyn QueueService>, QueueError> + Send + Sync,
{
    fn create(&self, provider: StorageProvider) -> Result<Arc<dyn QueueService>, QueueError> {
        self(provider)
    }
}

/// Cloud backends: SQS for S3, Pub/Sub for GCS, Azure Queue Storage for Azure
pub struct CloudQueueFactory {
    config: QueueConfig,
}

impl CloudQueueFactory {
    pub fn new(config: QueueConfig) -> Self {
        Self { config }
    }
}

impl QueueFactory for CloudQueueFactory {
    fn create(&self, provider: StorageProvider) -> Result<Arc<dyn QueueService>, QueueError> {
        let queue: Arc<dyn QueueService> = match provider {
            StorageProvider::S3 => Arc::new(SqsQueueService::from_config(&self.config.sqs)),
            StorageProvider::Gcs => Arc::new(PubSubQueueService::from_config(&self.config.pubsub)),
            StorageProvider::Azure => Arc::new(AzureQueueService::from_config(&self.config.azure)),
        };
        Ok(queue)
    }
}

struct ManagerState {
    queues: HashMap<StorageProvider, Arc<dyn QueueService>>,
    enabled: bool,
}

pub struct QueueManager {
    state: RwLock<ManagerState>,
    factory: Box<dyn QueueFactory>,
    task_store: Option<QueueTaskStore>,
}

impl QueueManager {
    pub fn new(factory: impl QueueFactory + 'static) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                queues: HashMap::new(),
                enabled: true,
            }),
            factory: Box::new(factory),
            task_store: None,
        }
    }

    /// Record enqueue/dequeue transitions in `store`
    pub fn with_task_store(mut self, store: QueueTaskStore) -> Self {
        self.task_store = Some(store);
        self
    }

    /// Cached queue for `provider`, built on first request
    pub fn get_or_create_queue(
        &self,
        provider: StorageProvider,
    ) -> Result<Arc<dyn QueueService>, QueueError> {
        {
            let state = self.state.read();
            if !state.enabled {
                return Err(QueueError::Disabled);
            }
            if let Some(queue) = state.queues.get(&provider) {
                return Ok(queue.clone());
            }
        }

        let mut state = self.state.write();
        if !state.enabled {
            return Err(QueueError::Disabled);
        }
        if let Some(queue) = state.queues.get(&provider) {
            return Ok(queue.clone());
        }

        let queue = self.factory.create(provider)?;
        tracing::info!("Created {} queue for provider {}", queue.kind(), provider);
        state.queues.insert(provider, queue.clone());
        Ok(queue)
    }

    pub async fn enqueue_ocr_task(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError> {
        let queue = self.get_or_create_queue(provider)?;
        let delivery = queue.enqueue(filename, provider).await?;

        tracing::info!(
            "Enqueued OCR task: filename={}, provider={}, route={:?}",
            filename,
            provider,
            delivery.route
        );

        if let Some(store) = &self.task_store {
            if let Err(e) = store.log_enqueue(filename, provider.as_str()).await {
                tracing::warn!("Failed to audit enqueue of {}: {}", filename, e);
            }
        }

        Ok(delivery)
    }

    /// Next task for `provider`; may block for the backend's wait time
    pub async fn dequeue_ocr_task(
        &self,
        provider: StorageProvider,
        cancel: &CancellationToken,
    ) -> Result<Option<Dequeued>, QueueError> {
        let queue = self.get_or_create_queue(provider)?;
        let dequeued = queue.dequeue(cancel).await?;

        if let (Some(task), Some(store)) = (&dequeued, &self.task_store) {
            if let Err(e) = store
                .log_dequeue(&task.task.filename, &task.task.storage_provider)
                .await
            {
                tracing::warn!("Failed to audit dequeue of {}: {}", task.task.filename, e);
            }
        }

        Ok(dequeued)
    }

    /// Acknowledge a handled task on its backend
    pub async fn complete_ocr_task(
        &self,
        provider: StorageProvider,
        dequeued: &Dequeued,
    ) -> Result<(), QueueError> {
        self.get_or_create_queue(provider)?.complete(dequeued).await
    }

    pub fn enable(&self) {
        self.state.write().enabled = true;
        tracing::info!("Queue manager enabled");
    }

    pub fn disable(&self) {
        self.state.write().enabled = false;
        tracing::info!("Queue manager disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// Providers with a cached queue
    pub fn providers(&self) -> Vec<StorageProvider> {
        self.state.read().queues.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;
    use crate::queue::{FallbackQueue, Route};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fallback_factory(
        created: Arc<AtomicUsize>,
    ) -> impl Fn(StorageProvider) -> Result<Arc<dyn QueueService>, QueueError> + Send + Sync {
        move |_| {
            created.fetch_add(1, Ordering::SeqCst);
            let queue: Arc<dyn QueueService> = Arc::new(FallbackQueue::default());
            Ok(queue)
        }
    }

    #[tokio::test]
    async fn test_queue_created_once_per_provider() {
        let created = Arc::new(AtomicUsize::new(0));
        let manager = QueueManager::new(fallback_factory(created.clone()));

        manager.get_or_create_queue(StorageProvider::S3).unwrap();
        manager.get_or_create_queue(StorageProvider::S3).unwrap();
        manager.get_or_create_queue(StorageProvider::Azure).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        let mut providers = manager.providers();
        providers.sort_by_key(|p| p.as_str());
        assert_eq!(providers, vec![StorageProvider::Azure, StorageProvider::S3]);
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_roundtrip_with_audit() {
        let pool = setup_test_db().await;
        let store = QueueTaskStore::new(pool);
        let manager = QueueManager::new(fallback_factory(Arc::new(AtomicUsize::new(0))))
            .with_task_store(store.clone());
        let cancel = CancellationToken::new();

        manager.enqueue_ocr_task("scan.pdf", StorageProvider::Gcs).await.unwrap();
        let dequeued = manager
            .dequeue_ocr_task(StorageProvider::Gcs, &cancel)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dequeued.task.filename, "scan.pdf");
        assert_eq!(dequeued.task.storage_provider, "gcs");
        assert_eq!(dequeued.route, Route::Fallback);

        let stats = store.get_queue_stats("gcs").await.unwrap();
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.enqueued, 0);
    }

    #[tokio::test]
    async fn test_disabled_manager_fails_fast() {
        let manager = QueueManager::new(fallback_factory(Arc::new(AtomicUsize::new(0))));
        manager.disable();
        assert!(!manager.is_enabled());

        let err = manager
            .enqueue_ocr_task("scan.pdf", StorageProvider::S3)
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Disabled);

        let err = manager
            .dequeue_ocr_task(StorageProvider::S3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Disabled);

        manager.enable();
        assert!(manager.enqueue_ocr_task("scan.pdf", StorageProvider::S3).await.is_ok());
    }

    #[tokio::test]
    async fn test_factory_error_propagates() {
        let manager = QueueManager::new(|provider: StorageProvider| {
            Err::<Arc<dyn QueueService>, _>(QueueError::UnsupportedProvider(provider.to_string()))
        });

        let err = manager.get_or_create_queue(StorageProvider::Azure).err().unwrap();
        assert_eq!(err, QueueError::UnsupportedProvider("azure".to_string()));
        assert!(manager.providers().is_empty());
    }
}
