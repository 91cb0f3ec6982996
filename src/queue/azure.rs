//! Azure Queue Storage backend
//!
//! Pull-based with a visibility timeout. A received message is hidden for
//! the timeout and deleted through [`QueueService::complete`] using its
//! message id and pop receipt. Empty and malformed messages are deleted as
//! soon as they are seen.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::AzureQueueConfig;

use super::fallback::FallbackQueue;
use super::lazy::LazyClient;
use super::service::QueueService;
use super::types::{Delivery, Dequeued, OcrTask, QueueError, Receipt, Route, StorageProvider};

/// A received Azure queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub text: String,
}

/// The slice of the Azure Queue API the queue backend needs
#[async_trait]
pub trait AzureQueueApi: Send + Sync {
    /// Create the queue when it does not exist
    async fn ensure_queue(&self) -> Result<(), QueueError>;

    async fn put_message(&self, body: String) -> Result<Option<String>, QueueError>;

    /// Receive at most one message, hiding it for the visibility timeout
    async fn get_message(&self) -> Result<Option<AzureMessage>, QueueError>;

    async fn delete_message(&self, message_id: &str, pop_receipt: &str) -> Result<(), QueueError>;
}

pub struct AzureQueueService {
    client: LazyClient<dyn AzureQueueApi>,
    queue_ready: OnceCell<()>,
    fallback: FallbackQueue,
}

impl AzureQueueService {
    pub fn new(client: LazyClient<dyn AzureQueueApi>) -> Self {
        Self {
            client,
            queue_ready: OnceCell::new(),
            fallback: FallbackQueue::default(),
        }
    }

    /// Build from configuration; without the `azure` feature every call uses the fallback
    pub fn from_config(config: &AzureQueueConfig) -> Self {
        Self::new(connect_client(config))
    }

    async fn primary(&self) -> Result<Arc<dyn AzureQueueApi>, QueueError> {
        let client = self.client.get().await?;
        self.queue_ready
            .get_or_try_init(|| client.ensure_queue())
            .await?;
        Ok(client)
    }
}

#[async_trait]
impl QueueService for AzureQueueService {
    fn kind(&self) -> &'static str {
        "azure"
    }

    async fn enqueue(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError> {
        let task = OcrTask::new(filename, provider);
        let body = task.to_json()?;

        let client = match self.primary().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Azure queue unavailable: {}, using fallback", e);
                self.fallback.push(task);
                return Ok(Delivery::fallback());
            }
        };

        match client.put_message(body).await {
            Ok(message_id) => {
                tracing::info!(
                    "OCR task sent to Azure queue: file={}, provider={}",
                    filename,
                    provider
                );
                Ok(Delivery::primary(message_id))
            }
            Err(e) => {
                tracing::warn!("Failed to put Azure queue message: {}, using fallback", e);
                self.fallback.push(task);
                Ok(Delivery::fallback())
            }
        }
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError> {
        if let Some(task) = self.fallback.try_pop() {
            return Ok(Some(Dequeued::from_fallback(task)));
        }

        let client = match self.primary().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Azure queue unavailable: {}, using fallback", e);
                return self.fallback.take(cancel).await;
            }
        };

        let received = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            received = client.get_message() => received,
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Failed to receive Azure queue message: {}, using fallback", e);
                return self.fallback.take(cancel).await;
            }
        };

        if message.text.trim().is_empty() {
            tracing::warn!("Dropping empty Azure queue message {}", message.message_id);
            discard(client.as_ref(), &message).await;
            return Ok(None);
        }

        match OcrTask::from_json(&message.text) {
            Ok(task) => Ok(Some(Dequeued {
                task,
                route: Route::Primary,
                receipt: Receipt::Azure {
                    message_id: message.message_id,
                    pop_receipt: message.pop_receipt,
                },
            })),
            Err(e) => {
                tracing::warn!("Dropping malformed Azure queue message: {}", e);
                discard(client.as_ref(), &message).await;
                Err(e)
            }
        }
    }

    async fn complete(&self, dequeued: &Dequeued) -> Result<(), QueueError> {
        let Receipt::Azure {
            message_id,
            pop_receipt,
        } = &dequeued.receipt
        else {
            return Ok(());
        };

        let client = self.client.get().await?;
        client.delete_message(message_id, pop_receipt).await
    }
}

async fn discard(client: &dyn AzureQueueApi, message: &AzureMessage) {
    if let Err(e) = client
        .delete_message(&message.message_id, &message.pop_receipt)
        .await
    {
        tracing::warn!("Failed to delete Azure queue message {}: {}", message.message_id, e);
    }
}

#[cfg(feature = "azure")]
fn connect_client(config: &AzureQueueConfig) -> LazyClient<dyn AzureQueueApi> {
    let config = config.clone();
    LazyClient::new("azure", move || {
        let client: Arc<dyn AzureQueueApi> = Arc::new(sdk::SdkAzureQueueClient::new(&config));
        async move { Ok(client) }
    })
}

#[cfg(not(feature = "azure"))]
fn connect_client(_config: &AzureQueueConfig) -> LazyClient<dyn AzureQueueApi> {
    LazyClient::unavailable("azure", "built without the `azure` feature")
}

/// Whether a metadata probe says the queue must be created. Only a 404
/// means missing; other failures are reported.
#[cfg(any(feature = "azure", test))]
fn queue_missing(probe: Result<(), (Option<u16>, String)>) -> Result<bool, QueueError> {
    match probe {
        Ok(()) => Ok(false),
        Err((Some(404), _)) => Ok(true),
        Err((_, message)) => Err(QueueError::backend("azure", message)),
    }
}

#[cfg(feature = "azure")]
mod sdk {
    use super::*;
    use std::time::Duration;

    use azure_storage::{CloudLocation, StorageCredentials};
    use azure_storage_queues::{PopReceipt, QueueClient, QueueServiceClientBuilder};

    /// Azure queue client backed by `azure_storage_queues`
    pub struct SdkAzureQueueClient {
        queue: QueueClient,
        visibility_timeout: Duration,
    }

    impl SdkAzureQueueClient {
        pub fn new(config: &AzureQueueConfig) -> Self {
            let credentials =
                StorageCredentials::access_key(config.account_name.clone(), config.account_key.clone());
            let location = CloudLocation::Custom {
                account: config.account_name.clone(),
                uri: format!("{}/{}", config.endpoint.trim_end_matches('/'), config.account_name),
            };
            let service = QueueServiceClientBuilder::with_location(location, credentials).build();

            Self {
                queue: service.queue_client(config.queue_name.clone()),
                visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            }
        }
    }

    #[async_trait]
    impl AzureQueueApi for SdkAzureQueueClient {
        async fn ensure_queue(&self) -> Result<(), QueueError> {
            let probe = match self.queue.get_metadata().await {
                Ok(_) => Ok(()),
                Err(e) => {
                    let status = e.as_http_error().map(|http| u16::from(http.status()));
                    Err((status, e.to_string()))
                }
            };
            if !queue_missing(probe)? {
                return Ok(());
            }

            tracing::info!("Creating Azure queue");
            self.queue
                .create()
                .await
                .map_err(|e| QueueError::backend("azure", e))?;
            Ok(())
        }

        async fn put_message(&self, body: String) -> Result<Option<String>, QueueError> {
            self.queue
                .put_message(body)
                .await
                .map_err(|e| QueueError::backend("azure", e))?;
            Ok(None)
        }

        async fn get_message(&self) -> Result<Option<AzureMessage>, QueueError> {
            let response = self
                .queue
                .get_messages()
                .number_of_messages(1)
                .visibility_timeout(self.visibility_timeout)
                .await
                .map_err(|e| QueueError::backend("azure", e))?;

            Ok(response.messages.into_iter().next().map(|message| AzureMessage {
                message_id: message.pop_receipt.message_id().to_string(),
                pop_receipt: message.pop_receipt.pop_receipt().to_string(),
                text: message.message_text,
            }))
        }

        async fn delete_message(&self, message_id: &str, pop_receipt: &str) -> Result<(), QueueError> {
            self.queue
                .pop_receipt_client(PopReceipt::new(message_id, pop_receipt))
                .delete()
                .await
                .map_err(|e| QueueError::backend("azure", e))?;
            Ok(())
        }
    }
}
