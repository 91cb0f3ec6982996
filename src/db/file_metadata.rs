//! File metadata database operations

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{build_storage_path, namespace_for};

use super::timestamp;

/// Where an uploaded file was stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileMetadata {
    pub id: String,
    pub filename: String,
    pub namespace: String,
    pub size: i64,
    pub storage_provider: String,
    pub storage_path: String,
    pub uploaded_at: String,
}

/// File metadata repository
#[derive(Clone)]
pub struct FileMetadataRepository {
    pool: SqlitePool,
}

impl FileMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an upload at its namespaced path, replacing any earlier record
    pub async fn record(
        &self,
        filename: &str,
        storage_provider: &str,
        size: i64,
    ) -> Result<FileMetadata> {
        let storage_path = build_storage_path(filename);
        self.record_at(filename, storage_provider, &storage_path, size)
            .await
    }

    /// Record an upload stored at an explicit path
    pub async fn record_at(
        &self,
        filename: &str,
        storage_provider: &str,
        storage_path: &str,
        size: i64,
    ) -> Result<FileMetadata> {
        sqlx::query(
            r#"
            INSERT INTO file_metadata (id, filename, namespace, size, storage_provider, storage_path, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename, storage_provider) DO UPDATE SET
                namespace = excluded.namespace,
                size = excluded.size,
                storage_path = excluded.storage_path,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(filename)
        .bind(namespace_for(filename).as_str())
        .bind(size)
        .bind(storage_provider)
        .bind(storage_path)
        .bind(timestamp())
        .execute(&self.pool)
        .await?;

        self.find_by_filename(filename, storage_provider)
            .await?
            .ok_or_else(|| crate::error::AppError::Internal("Failed to fetch recorded file metadata".to_string()))
    }

    pub async fn find_by_filename(
        &self,
        filename: &str,
        storage_provider: &str,
    ) -> Result<Option<FileMetadata>> {
        let metadata = sqlx::query_as::<_, FileMetadata>(
            r#"
            SELECT id, filename, namespace, size, storage_provider, storage_path, uploaded_at
            FROM file_metadata
            WHERE filename = ? AND storage_provider = ?
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .fetch_optional(&self.pool)
        .await?;

        Ok(metadata)
    }

    pub async fn delete(&self, filename: &str, storage_provider: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_metadata WHERE filename = ? AND storage_provider = ?")
            .bind(filename)
            .bind(storage_provider)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;

    #[tokio::test]
    async fn test_record_and_find() {
        let repo = FileMetadataRepository::new(setup_test_db().await);

        let recorded = repo.record("report.pdf", "s3", 2048).await.unwrap();
        assert_eq!(recorded.namespace, "documents");
        assert_eq!(recorded.storage_path, "documents/report.pdf");

        let found = repo.find_by_filename("report.pdf", "s3").await.unwrap().unwrap();
        assert_eq!(found.id, recorded.id);
        assert!(repo.find_by_filename("report.pdf", "gcs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_replaces_path() {
        let repo = FileMetadataRepository::new(setup_test_db().await);
        repo.record("photo.png", "azure", 10).await.unwrap();
        let updated = repo
            .record_at("photo.png", "azure", "legacy/photo.png", 12)
            .await
            .unwrap();

        assert_eq!(updated.storage_path, "legacy/photo.png");
        assert_eq!(updated.size, 12);
        assert!(repo.delete("photo.png", "azure").await.unwrap());
    }
}
