//! Error types for the OCR pipeline

use thiserror::Error;

use crate::queue::QueueError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Storage provider not configured: {0}")]
    ProviderUnavailable(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
