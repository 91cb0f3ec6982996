//! Lazily connected, memoised backend clients

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;

use super::types::QueueError;

type ConnectFn<C> = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<C>, QueueError>> + Send + Sync>;

/// A client that is built on first use and shared afterwards.
///
/// A failed connection attempt leaves the cell empty, so the next call
/// tries again.
pub struct LazyClient<C: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    cell: OnceCell<Arc<C>>,
    connect: ConnectFn<C>,
}

impl<C: ?Sized + Send + Sync + 'static> LazyClient<C> {
    pub fn new<F, Fut>(name: &'static str, connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<C>, QueueError>> + Send + 'static,
    {
        Self {
            name,
            cell: OnceCell::new(),
            connect: Box::new(move || connect().boxed()),
        }
    }

    /// Wrap an already-built client
    pub fn ready(name: &'static str, client: Arc<C>) -> Self {
        Self::new(name, move || {
            let client = Arc::clone(&client);
            async move { Ok(client) }
        })
    }

    /// A client whose construction always fails
    pub fn unavailable(name: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(name, move || {
            let reason = reason.clone();
            async move { Err(QueueError::ClientUnavailable(reason)) }
        })
    }

    pub async fn get(&self) -> Result<Arc<C>, QueueError> {
        let client = self
            .cell
            .get_or_try_init(|| {
                tracing::debug!("Connecting {} client", self.name);
                (self.connect)()
            })
            .await?;
        Ok(Arc::clone(client))
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_connects_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy: LazyClient<String> = LazyClient::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new("client".to_string())) }
        });

        assert!(!lazy.is_connected());
        assert_eq!(*lazy.get().await.unwrap(), "client");
        assert_eq!(*lazy.get().await.unwrap(), "client");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lazy.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy: LazyClient<u32> = LazyClient::new("flaky", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(QueueError::ClientUnavailable("down".to_string()))
                } else {
                    Ok(Arc::new(7))
                }
            }
        });

        assert!(lazy.get().await.is_err());
        assert_eq!(*lazy.get().await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let lazy: LazyClient<u32> = LazyClient::unavailable("none", "not compiled in");
        assert_eq!(
            lazy.get().await.unwrap_err(),
            QueueError::ClientUnavailable("not compiled in".to_string())
        );
    }
}
