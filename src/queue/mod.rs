//! Queue module
//!
//! Task queues per storage provider: SQS, Pub/Sub and Azure Queue Storage
//! backends, each degrading to an in-process fallback, and the manager that
//! owns them.

mod azure;
mod fallback;
mod lazy;
mod manager;
mod pubsub;
mod service;
mod sqs;
mod types;

pub use azure::{AzureMessage, AzureQueueApi, AzureQueueService};
pub use fallback::{FallbackQueue, DEFAULT_FALLBACK_WAIT};
pub use lazy::LazyClient;
pub use manager::{CloudQueueFactory, QueueFactory, QueueManager};
pub use pubsub::{AckDecision, MessageHandler, PubSubApi, PubSubQueueService, PubSubSettings};
pub use service::QueueService;
pub use sqs::{AwsSqsClient, SqsApi, SqsMessage, SqsQueueService};
pub use types::*;
