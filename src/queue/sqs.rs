//! AWS SQS queue backend
//!
//! Pull-based: messages are long-polled and stay on the queue until they are
//! deleted through [`QueueService::complete`] or their visibility timeout
//! lapses. Malformed bodies are deleted immediately.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::{
    config::{Credentials, Region},
    types::QueueAttributeName,
    Client,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::SqsConfig;

use super::fallback::FallbackQueue;
use super::lazy::LazyClient;
use super::service::QueueService;
use super::types::{Delivery, Dequeued, OcrTask, QueueError, Receipt, Route, StorageProvider};

/// A received SQS message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// The slice of the SQS API the queue backend needs
#[async_trait]
pub trait SqsApi: Send + Sync {
    /// Resolve the queue URL, creating the queue when it does not exist
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError>;

    async fn send(&self, queue_url: &str, body: String) -> Result<Option<String>, QueueError>;

    /// Long-poll for at most one message
    async fn receive(&self, queue_url: &str) -> Result<Option<SqsMessage>, QueueError>;

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError>;
}

/// SQS client backed by the AWS SDK
pub struct AwsSqsClient {
    client: Client,
    wait_time_seconds: i32,
    visibility_timeout: i32,
    message_retention_seconds: i32,
}

impl AwsSqsClient {
    pub fn new(config: &SqsConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ocr-pipeline",
        );

        let sqs_config = aws_sdk_sqs::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .build();

        Self {
            client: Client::from_conf(sqs_config),
            wait_time_seconds: config.wait_time_seconds,
            visibility_timeout: config.visibility_timeout,
            message_retention_seconds: config.message_retention_seconds,
        }
    }
}

#[async_trait]
impl SqsApi for AwsSqsClient {
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        match self.client.get_queue_url().queue_name(queue_name).send().await {
            Ok(output) => output
                .queue_url()
                .map(|s| s.to_string())
                .ok_or_else(|| QueueError::backend("sqs", "GetQueueUrl returned no URL")),
            Err(e) => {
                tracing::info!("SQS queue {} not found ({}), creating it", queue_name, e);
                let output = self
                    .client
                    .create_queue()
                    .queue_name(queue_name)
                    .attributes(
                        QueueAttributeName::VisibilityTimeout,
                        self.visibility_timeout.to_string(),
                    )
                    .attributes(
                        QueueAttributeName::MessageRetentionPeriod,
                        self.message_retention_seconds.to_string(),
                    )
                    .send()
                    .await
                    .map_err(|e| QueueError::backend("sqs", e))?;

                output
                    .queue_url()
                    .map(|s| s.to_string())
                    .ok_or_else(|| QueueError::backend("sqs", "CreateQueue returned no URL"))
            }
        }
    }

    async fn send(&self, queue_url: &str, body: String) -> Result<Option<String>, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::backend("sqs", e))?;

        Ok(output.message_id().map(|s| s.to_string()))
    }

    async fn receive(&self, queue_url: &str) -> Result<Option<SqsMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| QueueError::backend("sqs", e))?;

        Ok(output.messages().first().map(|msg| SqsMessage {
            body: msg.body().unwrap_or_default().to_string(),
            receipt_handle: msg.receipt_handle().unwrap_or_default().to_string(),
        }))
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::backend("sqs", e))?;
        Ok(())
    }
}

/// SQS-backed queue service with in-process fallback
pub struct SqsQueueService {
    client: LazyClient<dyn SqsApi>,
    queue_name: String,
    queue_url: OnceCell<String>,
    fallback: FallbackQueue,
}

impl SqsQueueService {
    pub fn new(client: LazyClient<dyn SqsApi>, queue_name: impl Into<String>) -> Self {
        Self::with_fallback(client, queue_name, FallbackQueue::default())
    }

    pub fn with_fallback(
        client: LazyClient<dyn SqsApi>,
        queue_name: impl Into<String>,
        fallback: FallbackQueue,
    ) -> Self {
        Self {
            client,
            queue_name: queue_name.into(),
            queue_url: OnceCell::new(),
            fallback,
        }
    }

    /// Build from configuration; the SDK client is created on first use
    pub fn from_config(config: &SqsConfig) -> Self {
        let sdk_config = config.clone();
        let client: LazyClient<dyn SqsApi> = LazyClient::new("sqs", move || {
            let sdk_config = sdk_config.clone();
            async move {
                let client: Arc<dyn SqsApi> = Arc::new(AwsSqsClient::new(&sdk_config));
                Ok(client)
            }
        });
        Self::new(client, config.queue_name.clone())
    }

    async fn primary(&self) -> Result<(Arc<dyn SqsApi>, String), QueueError> {
        let client = self.client.get().await?;
        let url = self
            .queue_url
            .get_or_try_init(|| client.queue_url(&self.queue_name))
            .await?
            .clone();
        Ok((client, url))
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    fn kind(&self) -> &'static str {
        "sqs"
    }

    async fn enqueue(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError> {
        let task = OcrTask::new(filename, provider);
        let body = task.to_json()?;

        let (client, url) = match self.primary().await {
            Ok(primary) => primary,
            Err(e) => {
                tracing::warn!("SQS unavailable: {}, using fallback", e);
                self.fallback.push(task);
                return Ok(Delivery::fallback());
            }
        };

        match client.send(&url, body).await {
            Ok(message_id) => {
                tracing::info!("OCR task sent to SQS: file={}, provider={}", filename, provider);
                Ok(Delivery::primary(message_id))
            }
            Err(e) => {
                tracing::warn!("Failed to send message to SQS: {}, using fallback", e);
                self.fallback.push(task);
                Ok(Delivery::fallback())
            }
        }
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError> {
        if let Some(task) = self.fallback.try_pop() {
            return Ok(Some(Dequeued::from_fallback(task)));
        }

        let (client, url) = match self.primary().await {
            Ok(primary) => primary,
            Err(e) => {
                tracing::warn!("SQS unavailable: {}, using fallback", e);
                return self.fallback.take(cancel).await;
            }
        };

        let received = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            received = client.receive(&url) => received,
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Failed to receive message from SQS: {}, using fallback", e);
                return self.fallback.take(cancel).await;
            }
        };

        match OcrTask::from_json(&message.body) {
            Ok(task) => Ok(Some(Dequeued {
                task,
                route: Route::Primary,
                receipt: Receipt::Sqs(message.receipt_handle),
            })),
            Err(e) => {
                tracing::warn!("Dropping malformed SQS message: {}", e);
                if let Err(del) = client.delete(&url, &message.receipt_handle).await {
                    tracing::warn!("Failed to delete malformed SQS message: {}", del);
                }
                Err(e)
            }
        }
    }

    async fn complete(&self, dequeued: &Dequeued) -> Result<(), QueueError> {
        let Receipt::Sqs(handle) = &dequeued.receipt else {
            return Ok(());
        };

        let (client, url) = self.primary().await?;
        client.delete(&url, handle).await
    }
}
