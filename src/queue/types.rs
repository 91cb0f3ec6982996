//! Queue Types
//!
//! Wire payload, delivery routes and errors shared by every queue backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage provider a file lives on; each one owns a queue and a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// AWS S3, queued through SQS
    S3,
    /// Google Cloud Storage, queued through Pub/Sub
    Gcs,
    /// Azure Blob Storage, queued through Azure Queue Storage
    Azure,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "gcs" => Ok(Self::Gcs),
            "azure" => Ok(Self::Azure),
            other => Err(QueueError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Queue payload: `{"filename": ..., "storage_provider": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrTask {
    pub filename: String,
    pub storage_provider: String,
}

impl OcrTask {
    pub fn new(filename: impl Into<String>, provider: StorageProvider) -> Self {
        Self {
            filename: filename.into(),
            storage_provider: provider.as_str().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn from_json(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Malformed(e.to_string()))
    }
}

/// Which path an operation actually took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Fallback,
}

/// Outcome of a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub route: Route,
    /// Backend message id, when the backend returns one
    pub message_id: Option<String>,
}

impl Delivery {
    pub fn primary(message_id: Option<String>) -> Self {
        Self {
            route: Route::Primary,
            message_id,
        }
    }

    pub fn fallback() -> Self {
        Self {
            route: Route::Fallback,
            message_id: None,
        }
    }
}

/// Backend acknowledgement handle for a received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Nothing to acknowledge (fallback, or acked on hand-off)
    None,
    /// SQS receipt handle
    Sqs(String),
    /// Azure message id and pop receipt
    Azure { message_id: String, pop_receipt: String },
}

/// A task taken off a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dequeued {
    pub task: OcrTask,
    pub route: Route,
    pub receipt: Receipt,
}

impl Dequeued {
    pub fn from_fallback(task: OcrTask) -> Self {
        Self {
            task,
            route: Route::Fallback,
            receipt: Receipt::None,
        }
    }
}

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue manager is disabled")]
    Disabled,

    #[error("unsupported storage provider: {0}")]
    UnsupportedProvider(String),

    #[error("queue client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("{backend} request failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("malformed task payload: {0}")]
    Malformed(String),

    #[error("dequeue cancelled")]
    Cancelled,
}

impl QueueError {
    pub fn backend(backend: &'static str, err: impl fmt::Display) -> Self {
        Self::Backend {
            backend,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wire_format() {
        let task = OcrTask::new("scan.pdf", StorageProvider::Azure);
        let json = task.to_json().unwrap();
        assert_eq!(json, r#"{"filename":"scan.pdf","storage_provider":"azure"}"#);
    }

    #[test]
    fn test_task_rejects_malformed_payload() {
        let err = OcrTask::from_json("{\"filename\": 3}").unwrap_err();
        assert!(matches!(err, QueueError::Malformed(_)));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("S3".parse::<StorageProvider>().unwrap(), StorageProvider::S3);
        assert_eq!(" gcs ".parse::<StorageProvider>().unwrap(), StorageProvider::Gcs);
        assert!(matches!(
            "dropbox".parse::<StorageProvider>(),
            Err(QueueError::UnsupportedProvider(_))
        ));
    }
}
