//! In-process fallback queue
//!
//! FIFO used when a cloud backend cannot be reached. Contents do not survive
//! a restart and are not shared across processes.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::service::QueueService;
use super::types::{Delivery, Dequeued, OcrTask, QueueError, StorageProvider};

/// Default time a fallback dequeue waits for work
pub const DEFAULT_FALLBACK_WAIT: Duration = Duration::from_secs(1);

pub struct FallbackQueue {
    items: Mutex<VecDeque<OcrTask>>,
    notify: Notify,
    wait: Duration,
}

impl FallbackQueue {
    pub fn new(wait: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            wait,
        }
    }

    pub fn push(&self, task: OcrTask) {
        self.items.lock().push_back(task);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<OcrTask> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wait up to the configured duration for a task
    pub async fn pop(&self, cancel: &CancellationToken) -> Result<Option<OcrTask>, QueueError> {
        let deadline = tokio::time::Instant::now() + self.wait;

        loop {
            if let Some(task) = self.try_pop() {
                return Ok(Some(task));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(self.try_pop()),
                _ = self.notify.notified() => {}
            }
        }
    }

    /// `pop` wrapped as a fallback-routed dequeue result
    pub async fn take(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError> {
        Ok(self.pop(cancel).await?.map(Dequeued::from_fallback))
    }
}

impl Default for FallbackQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_WAIT)
    }
}

#[async_trait]
impl QueueService for FallbackQueue {
    fn kind(&self) -> &'static str {
        "fallback"
    }

    async fn enqueue(
        &self,
        filename: &str,
        provider: StorageProvider,
    ) -> Result<Delivery, QueueError> {
        self.push(OcrTask::new(filename, provider));
        Ok(Delivery::fallback())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Dequeued>, QueueError> {
        self.take(cancel).await
    }

    async fn complete(&self, _dequeued: &Dequeued) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Route;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FallbackQueue::default();
        queue.push(OcrTask::new("a.png", StorageProvider::S3));
        queue.push(OcrTask::new("b.png", StorageProvider::S3));

        let cancel = CancellationToken::new();
        assert_eq!(queue.pop(&cancel).await.unwrap().unwrap().filename, "a.png");
        assert_eq!(queue.pop(&cancel).await.unwrap().unwrap().filename, "b.png");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_times_out_empty() {
        let queue = FallbackQueue::new(Duration::from_secs(2));
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        assert!(queue.pop(&cancel).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(FallbackQueue::new(Duration::from_secs(30)));
        let cancel = CancellationToken::new();

        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(OcrTask::new("late.pdf", StorageProvider::Gcs));
        });

        let task = queue.pop(&cancel).await.unwrap().unwrap();
        assert_eq!(task.filename, "late.pdf");
    }

    #[tokio::test]
    async fn test_pop_honours_cancellation() {
        let queue = FallbackQueue::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(queue.pop(&cancel).await.unwrap_err(), QueueError::Cancelled);
    }

    #[tokio::test]
    async fn test_queue_service_contract() {
        let queue = FallbackQueue::default();
        let delivery = queue.enqueue("doc.pdf", StorageProvider::Azure).await.unwrap();
        assert_eq!(delivery.route, Route::Fallback);

        let dequeued = queue.dequeue(&CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(dequeued.task, OcrTask::new("doc.pdf", StorageProvider::Azure));
        assert_eq!(dequeued.route, Route::Fallback);
        queue.complete(&dequeued).await.unwrap();
    }
}
