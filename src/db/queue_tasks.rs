//! Queue task audit log
//!
//! Records lifecycle transitions of queued tasks. Observability only; the
//! queues themselves never read it.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

use super::timestamp;

/// Lifecycle state of an audited task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Dequeued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Dequeued => "dequeued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Audit record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueTaskRecord {
    pub id: String,
    pub filename: String,
    pub storage_provider: String,
    pub status: String,
    pub enqueued_at: Option<String>,
    pub dequeued_at: Option<String>,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
}

/// Task counts per status for one provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: i64,
    pub dequeued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.enqueued + self.dequeued + self.processing + self.completed + self.failed
    }
}

/// Queue task store
#[derive(Clone)]
pub struct QueueTaskStore {
    pool: SqlitePool,
}

impl QueueTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn log_enqueue(&self, filename: &str, storage_provider: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_tasks (id, filename, storage_provider, status, enqueued_at)
            VALUES (?, ?, ?, 'enqueued', ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(filename)
        .bind(storage_provider)
        .bind(timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark the oldest enqueued record as dequeued, or record a fresh
    /// dequeue when the enqueue happened elsewhere.
    pub async fn log_dequeue(&self, filename: &str, storage_provider: &str) -> Result<()> {
        let now = timestamp();

        let updated = self
            .advance(
                filename,
                storage_provider,
                &[TaskStatus::Enqueued],
                TaskStatus::Dequeued,
                "dequeued_at",
                &now,
                None,
            )
            .await?;

        if !updated {
            sqlx::query(
                r#"
                INSERT INTO queue_tasks (id, filename, storage_provider, status, dequeued_at)
                VALUES (?, ?, ?, 'dequeued', ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(filename)
            .bind(storage_provider)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn log_processing(&self, filename: &str, storage_provider: &str) -> Result<()> {
        self.advance(
            filename,
            storage_provider,
            &[TaskStatus::Dequeued, TaskStatus::Enqueued],
            TaskStatus::Processing,
            "processed_at",
            &timestamp(),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn log_completed(&self, filename: &str, storage_provider: &str) -> Result<()> {
        self.advance(
            filename,
            storage_provider,
            &[TaskStatus::Processing, TaskStatus::Dequeued],
            TaskStatus::Completed,
            "processed_at",
            &timestamp(),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn log_failed(&self, filename: &str, storage_provider: &str, error: &str) -> Result<()> {
        self.advance(
            filename,
            storage_provider,
            &[TaskStatus::Processing, TaskStatus::Dequeued],
            TaskStatus::Failed,
            "processed_at",
            &timestamp(),
            Some(error),
        )
        .await?;
        Ok(())
    }

    pub async fn get_queue_stats(&self, storage_provider: &str) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM queue_tasks
            WHERE storage_provider = ?
            GROUP BY status
            "#,
        )
        .bind(storage_provider)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "enqueued" => stats.enqueued = count,
                "dequeued" => stats.dequeued = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                other => tracing::warn!("Unknown queue task status in store: {}", other),
            }
        }

        Ok(stats)
    }

    /// Records for a file, oldest first
    pub async fn list_tasks(&self, filename: &str, storage_provider: &str) -> Result<Vec<QueueTaskRecord>> {
        let records = sqlx::query_as::<_, QueueTaskRecord>(
            r#"
            SELECT id, filename, storage_provider, status, enqueued_at,
                   dequeued_at, processed_at, error_message
            FROM queue_tasks
            WHERE filename = ? AND storage_provider = ?
            ORDER BY COALESCE(enqueued_at, dequeued_at, processed_at)
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Move the oldest record in one of `from` to `to`; returns whether one moved.
    ///
    /// Statuses are tried in order, so the first listed wins.
    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &self,
        filename: &str,
        storage_provider: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        time_column: &str,
        at: &str,
        error: Option<&str>,
    ) -> Result<bool> {
        for status in from {
            // time_column is one of a fixed set of column names
            let sql = format!(
                r#"
                UPDATE queue_tasks
                SET status = ?, {col} = ?, error_message = COALESCE(?, error_message)
                WHERE id = (
                    SELECT id FROM queue_tasks
                    WHERE filename = ? AND storage_provider = ? AND status = ?
                    ORDER BY COALESCE(enqueued_at, dequeued_at)
                    LIMIT 1
                )
                "#,
                col = time_column
            );

            let result = sqlx::query(&sql)
                .bind(to.as_str())
                .bind(at)
                .bind(error)
                .bind(filename)
                .bind(storage_provider)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() > 0 {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = QueueTaskStore::new(setup_test_db().await);

        store.log_enqueue("a.pdf", "s3").await.unwrap();
        store.log_dequeue("a.pdf", "s3").await.unwrap();
        store.log_processing("a.pdf", "s3").await.unwrap();
        store.log_completed("a.pdf", "s3").await.unwrap();

        let records = store.list_tasks("a.pdf", "s3").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "completed");
        assert!(records[0].enqueued_at.is_some());
        assert!(records[0].dequeued_at.is_some());
        assert!(records[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn test_dequeue_without_enqueue_inserts_row() {
        let store = QueueTaskStore::new(setup_test_db().await);
        store.log_dequeue("b.png", "gcs").await.unwrap();

        let records = store.list_tasks("b.png", "gcs").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "dequeued");
        assert!(records[0].enqueued_at.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_takes_oldest_enqueued() {
        let store = QueueTaskStore::new(setup_test_db().await);
        store.log_enqueue("c.png", "s3").await.unwrap();
        store.log_enqueue("c.png", "s3").await.unwrap();
        store.log_dequeue("c.png", "s3").await.unwrap();

        let stats = store.get_queue_stats("s3").await.unwrap();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.total(), 2);
    }

    #[tokio::test]
    async fn test_failed_records_error() {
        let store = QueueTaskStore::new(setup_test_db().await);
        store.log_enqueue("d.png", "azure").await.unwrap();
        store.log_dequeue("d.png", "azure").await.unwrap();
        store.log_processing("d.png", "azure").await.unwrap();
        store.log_failed("d.png", "azure", "decode failed").await.unwrap();

        let records = store.list_tasks("d.png", "azure").await.unwrap();
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[0].error_message.as_deref(), Some("decode failed"));

        let stats = store.get_queue_stats("azure").await.unwrap();
        assert_eq!(stats, QueueStats { failed: 1, ..Default::default() });
    }
}
