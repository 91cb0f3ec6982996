//! GCP Pub/Sub queue backend
//!
//! Pub/Sub delivers messages by invoking a callback. This adapter runs a
//! single background receive loop per queue that hands decoded tasks to a
//! bounded channel; `dequeue` reads from that channel. Messages are acked
//! once the hand-off succeeds and nacked when decoding fails, the hand-off
//! times out, or the loop is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::config::PubSubConfig;

use super::fallback::FallbackQueue;
use super::lazy::LazyClient;
use super::service::QueueService;
use super::types::{Delivery, Dequeued, OcrTask, QueueError, Receipt, Route, StorageProvider};

/// What to tell Pub/Sub about a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

/// Callback invoked for every delivered message payload
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, AckDecision> + Send + Sync>;

/// The slice of the Pub/Sub API the queue backend needs
#[async_trait]
pub trait PubSubApi: Send + Sync {
    async fn ensure_topic(&self) -> Result<(), QueueError>;

    /// Publish and wait for the server-assigned message id
    async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError>;

    /// Ensure the topic and subscription exist
    async fn ensure_subscription(&self) -> Result<(), QueueError>;

    /// Stream messages into `handler` until cancelled or the stream fails
    async fn receive(
        &self,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<(), QueueError>;
}

/// Timing knobs for the adapter
#[derive(Debug, Clone)]
pub struct PubSubSettings {
    pub channel_capacity: usize,
    pub handoff_timeout: Duration,
    pub dequeue_timeout: Duration,
    pub restart_delay: Duration,
}

impl From<&PubSubConfig> for PubSubSettings {
    fn from(config: &PubSubConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity.max(1),
            handoff_timeout: Duration::from_secs(config.handoff_timeout_secs),
            dequeue_timeout: Duration::from_secs(config.dequeue_timeout_secs),
            restart_delay: Duration::from_secs(config.restart_delay_secs),
        }
    }
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 10,
            handoff_timeout: Duration::from_secs(10),
            dequeue_timeout: Duration::from_secs(30),
            restart_delay: Duration::from_secs(5),
        }
    }
}

pub struct PubSubQueueService {
    client: LazyClient<dyn PubSubApi>,
    settings: PubSubSettings,
    topic_ready: OnceCell<()>,
    subscription_ready: OnceCell<()>,
    sender: mpsc::Sender<OcrTask>,
    receiver: Mutex<mpsc::Receiver<OcrTask>>,
    /// Whether the receive loop is running
    receiving: Arc<Mutex<bool>>,
    fallback: FallbackQueue,
}

impl PubSubQueueService {
    pub fn new(client: LazyClient<dyn PubSubApi>, settings: PubSubSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity);

        Self {
            client,
            settings,
            topic_ready: OnceCell::new(),
            subscription_ready: OnceCell::new(),
            sender,
            receiver: Mutex::new(receiver),
            receiving: Arc::new(Mutex::new(false)),
            fallback: FallbackQueue::default(),
        }
    }

    /// Build from configuration; without the `gcp` feature every call uses the fallback
    pub fn from_config(config: &PubSubConfig) -> Self {
        Self::new(connect_client(config), PubSubSettings::from(config))
    }

    /// Start the receive loop unless one is already running
    async fn ensure_receiving(&self, client: Arc<dyn PubSubApi>, cancel: &CancellationToken) {
        let mut receiving = self.receiving.lock().await;
        if *receiving {
            return;
        }
        *receiving = true;

        tracing::info!("Starting Pub/Sub receive loop");
        tokio::spawn(receive_loop(
            client,
            self.sender.clone(),
            self.settings.clone(),
            cancel.clone(),
            Arc::clone(&self.receiving),
        ));
    }
}

async fn receive_loop(
    client: Arc<dyn PubSubApi>,
    sender: mpsc::Sender<OcrTask>,
    settings: PubSubSettings,
    cancel: CancellationToken,
    receiving: Arc<Mutex<bool>>,
) {
    loop {
        let handler = handoff_handler(sender.clone(), settings.handoff_timeout, cancel.clone());

        match client.receive(handler, cancel.clone()).await {
            Ok(()) if cancel.is_cancelled() => break,
            Ok(()) => tracing::warn!(
                "Pub/Sub receive stream ended, restarting in {:?}",
                settings.restart_delay
            ),
            Err(e) => tracing::warn!(
                "Pub/Sub receive failed: {}, restarting in {:?}",
                e,
                settings.restart_delay
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.restart_delay) => {}
        }
    }

    tracing::info!("Pub/Sub receive loop stopped");
    *receiving.lock().await = false;
}

fn handoff_handler(
    sender: mpsc::Sender<OcrTask>,
    timeout: Duration,
    cancel: CancellationToken,
) -> MessageHandler {
    Arc::new(move |data: Vec<u8>| {
        let sender = sender.clone();
        let cancel = cancel.clone();

        async move {
            let task: OcrTask = match serde_json::from_slice(&data) {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!("Malformed Pub/Sub message: {}", e);
                    return AckDecision::Nack;
                }
            };

            tokio::select! {
                sent = sender.send_timeout(task, timeout) => match sent {
                    Ok(()) => AckDecision::Ack,
                    Err(e) => {
                        tracing::warn!("Pub/Sub hand-off failed: {}", e);
                        AckDecision::Nack
                    }
                },
                _ = cancel.cancelled() => AckDecision::Nack,
            }
        }
        .boxed()
    })
}

#[async_trait]
impl QueueService for PubSubQueueService {
    fn kind(&self) -> &'static str {
        "pubsub"
    }

    async fn enqueue(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError> {
        let task = OcrTask::new(filename, provider);
        let data = task.to_json()?.into_bytes();

        let client = match self.client.get().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Pub/Sub client unavailable: {}, using fallback", e);
                self.fallback.push(task);
                return Ok(Delivery::fallback());
            }
        };

        if let Err(e) = self.topic_ready.get_or_try_init(|| client.ensure_topic()).await {
            tracing::warn!("Failed to ensure Pub/Sub topic: {}, using fallback", e);
            self.fallback.push(task);
            return Ok(Delivery::fallback());
        }

        match client.publish(data).await {
            Ok(message_id) => {
                tracing::info!(
                    "OCR task published to Pub/Sub: file={}, provider={}, id={}",
                    filename,
                    provider,
                    message_id
                );
                Ok(Delivery::primary(Some(message_id)))
            }
            Err(e) => {
                tracing::warn!("Failed to publish to Pub/Sub: {}, using fallback", e);
                self.fallback.push(task);
                Ok(Delivery::fallback())
            }
        }
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError> {
        if let Some(task) = self.fallback.try_pop() {
            return Ok(Some(Dequeued::from_fallback(task)));
        }

        let client = match self.client.get().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Pub/Sub client unavailable: {}, using fallback", e);
                return self.fallback.take(cancel).await;
            }
        };

        if let Err(e) = self
            .subscription_ready
            .get_or_try_init(|| client.ensure_subscription())
            .await
        {
            tracing::warn!("Failed to ensure Pub/Sub subscription: {}, using fallback", e);
            return self.fallback.take(cancel).await;
        }

        self.ensure_receiving(client, cancel).await;

        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            received = tokio::time::timeout(self.settings.dequeue_timeout, receiver.recv()) => {
                match received {
                    Ok(Some(task)) => Ok(Some(Dequeued {
                        task,
                        route: Route::Primary,
                        receipt: Receipt::None,
                    })),
                    Ok(None) | Err(_) => Ok(None),
                }
            }
        }
    }

    async fn complete(&self, _dequeued: &Dequeued) -> Result<(), QueueError> {
        // Acked on hand-off
        Ok(())
    }
}

#[cfg(feature = "gcp")]
fn connect_client(config: &PubSubConfig) -> LazyClient<dyn PubSubApi> {
    let config = config.clone();
    LazyClient::new("pubsub", move || {
        let config = config.clone();
        async move {
            let client: Arc<dyn PubSubApi> = Arc::new(gcp::GcpPubSubClient::connect(&config).await?);
            Ok(client)
        }
    })
}

#[cfg(not(feature = "gcp"))]
fn connect_client(_config: &PubSubConfig) -> LazyClient<dyn PubSubApi> {
    LazyClient::unavailable("pubsub", "built without the `gcp` feature")
}

#[cfg(feature = "gcp")]
mod gcp {
    use super::*;

    use google_cloud_googleapis::pubsub::v1::PubsubMessage;
    use google_cloud_pubsub::client::{Client, ClientConfig};
    use google_cloud_pubsub::publisher::Publisher;
    use google_cloud_pubsub::subscription::SubscriptionConfig;

    /// Pub/Sub client backed by `google-cloud-pubsub`
    pub struct GcpPubSubClient {
        client: Client,
        publisher: Publisher,
        topic_id: String,
        subscription_id: String,
        ack_deadline_seconds: i32,
    }

    impl GcpPubSubClient {
        pub async fn connect(config: &PubSubConfig) -> Result<Self, QueueError> {
            let mut client_config = ClientConfig {
                project_id: Some(config.project_id.clone()),
                ..Default::default()
            };
            if config.emulator_host.is_none() {
                client_config = client_config
                    .with_auth()
                    .await
                    .map_err(|e| QueueError::ClientUnavailable(e.to_string()))?;
            }

            let client = Client::new(client_config)
                .await
                .map_err(|e| QueueError::ClientUnavailable(e.to_string()))?;
            let publisher = client.topic(&config.topic).new_publisher(None);

            Ok(Self {
                client,
                publisher,
                topic_id: config.topic.clone(),
                subscription_id: config.subscription.clone(),
                ack_deadline_seconds: config.ack_deadline_seconds,
            })
        }
    }

    #[async_trait]
    impl PubSubApi for GcpPubSubClient {
        async fn ensure_topic(&self) -> Result<(), QueueError> {
            let topic = self.client.topic(&self.topic_id);
            let exists = topic
                .exists(None)
                .await
                .map_err(|e| QueueError::backend("pubsub", e))?;
            if !exists {
                tracing::info!("Creating Pub/Sub topic {}", self.topic_id);
                topic
                    .create(None, None)
                    .await
                    .map_err(|e| QueueError::backend("pubsub", e))?;
            }
            Ok(())
        }

        async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError> {
            let message = PubsubMessage {
                data,
                ..Default::default()
            };
            let awaiter = self.publisher.publish(message).await;
            awaiter.get().await.map_err(|e| QueueError::backend("pubsub", e))
        }

        async fn ensure_subscription(&self) -> Result<(), QueueError> {
            self.ensure_topic().await?;

            let subscription = self.client.subscription(&self.subscription_id);
            let exists = subscription
                .exists(None)
                .await
                .map_err(|e| QueueError::backend("pubsub", e))?;
            if !exists {
                tracing::info!("Creating Pub/Sub subscription {}", self.subscription_id);
                let config = SubscriptionConfig {
                    ack_deadline_seconds: self.ack_deadline_seconds,
                    ..Default::default()
                };
                self.client
                    .create_subscription(&self.subscription_id, &self.topic_id, config, None)
                    .await
                    .map_err(|e| QueueError::backend("pubsub", e))?;
            }
            Ok(())
        }

        async fn receive(
            &self,
            handler: MessageHandler,
            cancel: CancellationToken,
        ) -> Result<(), QueueError> {
            let subscription = self.client.subscription(&self.subscription_id);

            subscription
                .receive(
                    move |message, _ctx| {
                        let handler = Arc::clone(&handler);
                        async move {
                            let outcome = match handler(message.message.data.clone()).await {
                                AckDecision::Ack => message.ack().await,
                                AckDecision::Nack => message.nack().await,
                            };
                            if let Err(e) = outcome {
                                tracing::warn!("Failed to settle Pub/Sub message: {}", e);
                            }
                        }
                    },
                    cancel,
                    None,
                )
                .await
                .map_err(|e| QueueError::backend("pubsub", e))
        }
    }
}
