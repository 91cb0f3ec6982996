//! Queue service trait

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{Delivery, Dequeued, QueueError, StorageProvider};

/// Common enqueue/dequeue contract over every queue backend
///
/// Backends never surface their own infrastructure failures from
/// `enqueue`/`dequeue`; they park work on an in-process fallback instead and
/// report it through [`Delivery::route`] / [`Dequeued::route`].
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Short backend name used in logs
    fn kind(&self) -> &'static str;

    /// Publish a task for `filename`
    async fn enqueue(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError>;

    /// Take the next task, waiting a bounded time for one to arrive.
    /// `Ok(None)` means nothing arrived in time.
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError>;

    /// Acknowledge a task once it has been fully handled
    async fn complete(&self, dequeued: &Dequeued) -> Result<(), QueueError>;
}
