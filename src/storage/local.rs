//! Filesystem storage
//!
//! Stores files under a root directory using the same namespaced paths as
//! the cloud providers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

use super::namespace::{build_storage_path, Namespace};
use super::types::{FileInfo, UploadStatus};
use super::StorageService;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage path under the root, rejecting escapes
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StorageError::ObjectNotFound(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found(path: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn upload(&self, filename: &str, data: Vec<u8>) -> Result<UploadStatus, StorageError> {
        let storage_path = build_storage_path(filename);
        let target = self.resolve(&storage_path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = data.len() as i64;
        tokio::fs::write(&target, data).await?;

        Ok(UploadStatus {
            filename: filename.to_string(),
            storage_path,
            size,
        })
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        self.download_by_path(&build_storage_path(filename)).await
    }

    async fn download_by_path(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let source = self.resolve(path)?;
        tokio::fs::read(&source).await.map_err(|e| not_found(path, e))
    }

    async fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        let mut files = Vec::new();

        for namespace in [
            Namespace::Documents,
            Namespace::Images,
            Namespace::Media,
            Namespace::Others,
        ] {
            let dir = self.root.join(namespace.as_str());
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }

                let filename = entry.file_name().to_string_lossy().to_string();
                files.push(FileInfo {
                    storage_path: format!("{}{}", namespace.prefix(), filename),
                    filename,
                    size: metadata.len() as i64,
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        files.sort_by(|a, b| a.storage_path.cmp(&b.storage_path));
        Ok(files)
    }

    async fn delete(&self, filename: &str) -> Result<(), StorageError> {
        let storage_path = build_storage_path(filename);
        let target = self.resolve(&storage_path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| not_found(&storage_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let status = storage.upload("scan.pdf", b"%PDF".to_vec()).await.unwrap();
        assert_eq!(status.storage_path, "documents/scan.pdf");
        assert_eq!(status.size, 4);

        assert_eq!(storage.download("scan.pdf").await.unwrap(), b"%PDF");
        assert_eq!(
            storage.download_by_path("documents/scan.pdf").await.unwrap(),
            b"%PDF"
        );

        storage.upload("photo.png", vec![1, 2, 3]).await.unwrap();
        let listed = storage.list().await.unwrap();
        let paths: Vec<_> = listed.iter().map(|f| f.storage_path.as_str()).collect();
        assert_eq!(paths, vec!["documents/scan.pdf", "images/photo.png"]);

        storage.delete("scan.pdf").await.unwrap();
        assert!(matches!(
            storage.download("scan.pdf").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(matches!(
            storage.download_by_path("../etc/passwd").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }
}
