//! S3-compatible storage
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    operation::get_object::GetObjectError,
    primitives::ByteStream,
    Client,
};
use chrono::DateTime;

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::namespace::{build_storage_path, strip_namespace};
use super::types::{FileInfo, UploadStatus};
use super::StorageService;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ocr-pipeline",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for LocalStack and MinIO
            .build();

        let client = Client::from_conf(s3_config);

        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn map_get_error(key: &str, e: SdkError<GetObjectError>) -> StorageError {
        let message = DisplayErrorContext(&e).to_string();
        classify_get_error(key, e.into_service_error(), message)
    }
}

#[async_trait]
impl StorageService for S3Storage {
    async fn upload(&self, filename: &str, data: Vec<u8>) -> Result<UploadStatus, StorageError> {
        let key = build_storage_path(filename);
        let size = data.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;

        tracing::info!("Uploaded {} to s3://{}/{}", filename, self.bucket, key);

        Ok(UploadStatus {
            filename: filename.to_string(),
            storage_path: key,
            size,
        })
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        self.download_by_path(&build_storage_path(filename)).await
    }

    async fn download_by_path(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| Self::map_get_error(path, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .max_keys(1000);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                StorageError::SdkError(format!("Failed to list objects: {}", e))
            })?;

            files.extend(response.contents().iter().map(|obj| {
                let key = obj.key().unwrap_or_default().to_string();
                FileInfo {
                    filename: strip_namespace(&key).to_string(),
                    size: obj.size().unwrap_or(0),
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
                    storage_path: key,
                }
            }));

            if !response.is_truncated().unwrap_or(false) {
                break;
            }

            continuation_token = response.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(files)
    }

    async fn delete(&self, filename: &str) -> Result<(), StorageError> {
        let key = build_storage_path(filename);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to delete object {}: {}", key, e)))?;

        Ok(())
    }
}

/// A missing key is `ObjectNotFound`; anything else is an SDK failure
fn classify_get_error(key: &str, error: GetObjectError, message: String) -> StorageError {
    if error.is_no_such_key() {
        StorageError::ObjectNotFound(key.to_string())
    } else {
        StorageError::SdkError(format!("Failed to get object {}: {}", key, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::types::error::NoSuchKey;

    #[test]
    fn test_no_such_key_is_object_not_found() {
        let error = GetObjectError::NoSuchKey(NoSuchKey::builder().build());
        let mapped = classify_get_error("images/a.png", error, "service error".to_string());
        assert!(matches!(mapped, StorageError::ObjectNotFound(key) if key == "images/a.png"));
    }

    #[test]
    fn test_other_service_errors_stay_sdk_errors() {
        let error = GetObjectError::generic(ErrorMetadata::builder().code("AccessDenied").build());
        let mapped = classify_get_error("images/a.png", error, "service error: AccessDenied".to_string());
        assert!(matches!(mapped, StorageError::SdkError(message) if message.contains("AccessDenied")));
    }
}
