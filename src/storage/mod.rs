//! Storage module
//!
//! Provides the file storage contract used by the OCR worker, plus S3 and
//! local filesystem implementations.

mod local;
mod namespace;
mod s3;
mod types;

pub use local::LocalStorage;
pub use namespace::*;
pub use s3::S3Storage;
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::queue::StorageProvider;

/// File storage capability
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Store `data` under the namespaced path for `filename`
    async fn upload(&self, filename: &str, data: Vec<u8>) -> Result<UploadStatus, StorageError>;

    /// Fetch a file by name, resolving its namespaced path
    async fn download(&self, filename: &str) -> Result<Vec<u8>, StorageError>;

    /// Fetch a file by its exact storage path
    async fn download_by_path(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn list(&self) -> Result<Vec<FileInfo>, StorageError>;

    async fn delete(&self, filename: &str) -> Result<(), StorageError>;
}

/// Storage services keyed by provider
#[derive(Clone, Default)]
pub struct StorageRegistry {
    services: HashMap<StorageProvider, Arc<dyn StorageService>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: StorageProvider, service: Arc<dyn StorageService>) -> Self {
        self.services.insert(provider, service);
        self
    }

    pub fn get(&self, provider: StorageProvider) -> Result<Arc<dyn StorageService>, StorageError> {
        self.services
            .get(&provider)
            .cloned()
            .ok_or_else(|| StorageError::ProviderUnavailable(provider.to_string()))
    }
}
