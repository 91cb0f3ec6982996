//! OCR result database operations

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ocr::{join_page_text, mean_confidence, FailureKind, OcrPage, OcrResult, OcrStatus};

use super::timestamp;

/// Stored OCR result row
#[derive(Debug, Clone, sqlx::FromRow)]
struct OcrResultRow {
    id: String,
    filename: String,
    storage_provider: String,
    engine_name: String,
    status: String,
    extracted_text: String,
    average_confidence: f64,
    error_message: Option<String>,
    error_kind: Option<String>,
    processed_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct OcrPageRow {
    page_number: i64,
    text: String,
    confidence: f64,
}

/// Error log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub filename: String,
    pub storage_provider: String,
    pub engine_name: String,
    pub error_type: String,
    pub error_message: String,
    pub retry_count: i64,
    pub created_at: String,
}

impl OcrResultRow {
    fn into_result(self, pages: Vec<OcrPage>) -> Result<OcrResult> {
        let status = self
            .status
            .parse::<OcrStatus>()
            .map_err(AppError::Internal)?;
        let error_kind = self
            .error_kind
            .as_deref()
            .map(str::parse::<FailureKind>)
            .transpose()
            .map_err(AppError::Internal)?;
        let processed_at = DateTime::parse_from_rfc3339(&self.processed_at)
            .map_err(|e| AppError::Internal(format!("Bad processed_at {}: {}", self.processed_at, e)))?
            .with_timezone(&Utc);

        Ok(OcrResult {
            filename: self.filename,
            storage_provider: self.storage_provider,
            engine_name: self.engine_name,
            status,
            extracted_text: self.extracted_text,
            pages,
            confidence: self.average_confidence,
            processed_at,
            error: self.error_message,
            error_kind,
        })
    }
}

impl From<OcrPageRow> for OcrPage {
    fn from(row: OcrPageRow) -> Self {
        OcrPage::new(row.page_number.max(0) as u32, row.text, row.confidence)
    }
}

/// OCR result repository
#[derive(Clone)]
pub struct OcrResultRepository {
    pool: SqlitePool,
}

impl OcrResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a result, replacing any prior result and pages for the same key.
    ///
    /// Empty text is derived from the pages, as is a zero confidence.
    pub async fn save_ocr_result(&self, result: &OcrResult) -> Result<()> {
        let extracted_text = if result.extracted_text.is_empty() && !result.pages.is_empty() {
            join_page_text(&result.pages)
        } else {
            result.extracted_text.clone()
        };

        let confidence = if result.confidence == 0.0 && !result.pages.is_empty() {
            mean_confidence(&result.pages)
        } else {
            result.confidence
        };

        let processed_at = result
            .processed_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ocr_results (id, filename, storage_provider, engine_name, status,
                                     extracted_text, average_confidence, error_message, error_kind, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename, storage_provider, engine_name) DO UPDATE SET
                status = excluded.status,
                extracted_text = excluded.extracted_text,
                average_confidence = excluded.average_confidence,
                error_message = excluded.error_message,
                error_kind = excluded.error_kind,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&result.filename)
        .bind(&result.storage_provider)
        .bind(&result.engine_name)
        .bind(result.status.as_str())
        .bind(&extracted_text)
        .bind(confidence)
        .bind(&result.error)
        .bind(result.error_kind.map(|k| k.as_str()))
        .bind(&processed_at)
        .execute(&mut *tx)
        .await?;

        let (result_id,): (String,) = sqlx::query_as(
            r#"
            SELECT id FROM ocr_results
            WHERE filename = ? AND storage_provider = ? AND engine_name = ?
            "#,
        )
        .bind(&result.filename)
        .bind(&result.storage_provider)
        .bind(&result.engine_name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM ocr_pages WHERE result_id = ?")
            .bind(&result_id)
            .execute(&mut *tx)
            .await?;

        for page in &result.pages {
            sqlx::query(
                r#"
                INSERT INTO ocr_pages (result_id, page_number, text, confidence)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&result_id)
            .bind(page.page_number as i64)
            .bind(&page.text)
            .bind(page.confidence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Saved OCR result: file={}, provider={}, engine={}, status={}, pages={}",
            result.filename,
            result.storage_provider,
            result.engine_name,
            result.status,
            result.pages.len()
        );

        Ok(())
    }

    /// Get one engine's result for a file, with pages
    pub async fn get_ocr_result(
        &self,
        filename: &str,
        storage_provider: &str,
        engine_name: &str,
    ) -> Result<Option<OcrResult>> {
        let row = sqlx::query_as::<_, OcrResultRow>(
            r#"
            SELECT id, filename, storage_provider, engine_name, status, extracted_text,
                   average_confidence, error_message, error_kind, processed_at
            FROM ocr_results
            WHERE filename = ? AND storage_provider = ? AND engine_name = ?
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .bind(engine_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let pages = self.pages(&row.id).await?;
                Ok(Some(row.into_result(pages)?))
            }
            None => Ok(None),
        }
    }

    /// All results for a provider, newest first, without pages
    pub async fn list_ocr_results(&self, storage_provider: &str) -> Result<Vec<OcrResult>> {
        let rows = sqlx::query_as::<_, OcrResultRow>(
            r#"
            SELECT id, filename, storage_provider, engine_name, status, extracted_text,
                   average_confidence, error_message, error_kind, processed_at
            FROM ocr_results
            WHERE storage_provider = ?
            ORDER BY processed_at DESC
            "#,
        )
        .bind(storage_provider)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_result(Vec::new()))
            .collect()
    }

    /// Every engine's result for a file, with pages, ordered by engine name
    pub async fn get_ocr_comparison(
        &self,
        filename: &str,
        storage_provider: &str,
    ) -> Result<Vec<OcrResult>> {
        let rows = sqlx::query_as::<_, OcrResultRow>(
            r#"
            SELECT id, filename, storage_provider, engine_name, status, extracted_text,
                   average_confidence, error_message, error_kind, processed_at
            FROM ocr_results
            WHERE filename = ? AND storage_provider = ?
            ORDER BY engine_name
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let pages = self.pages(&row.id).await?;
            results.push(row.into_result(pages)?);
        }
        Ok(results)
    }

    /// Delete every engine's result for a file
    pub async fn delete_ocr_result(&self, filename: &str, storage_provider: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM ocr_pages WHERE result_id IN (
                SELECT id FROM ocr_results WHERE filename = ? AND storage_provider = ?
            )
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM ocr_results WHERE filename = ? AND storage_provider = ?")
            .bind(filename)
            .bind(storage_provider)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deleted.rows_affected() > 0)
    }

    /// Append to the error log
    pub async fn log_error(
        &self,
        filename: &str,
        storage_provider: &str,
        engine_name: &str,
        error_type: &str,
        error_message: &str,
        retry_count: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ocr_error_logs (filename, storage_provider, engine_name, error_type,
                                        error_message, retry_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .bind(engine_name)
        .bind(error_type)
        .bind(error_message)
        .bind(retry_count as i64)
        .bind(timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Error log entries for a file, oldest first
    pub async fn list_errors(
        &self,
        filename: &str,
        storage_provider: &str,
    ) -> Result<Vec<ErrorLogEntry>> {
        let entries = sqlx::query_as::<_, ErrorLogEntry>(
            r#"
            SELECT id, filename, storage_provider, engine_name, error_type,
                   error_message, retry_count, created_at
            FROM ocr_error_logs
            WHERE filename = ? AND storage_provider = ?
            ORDER BY id
            "#,
        )
        .bind(filename)
        .bind(storage_provider)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn pages(&self, result_id: &str) -> Result<Vec<OcrPage>> {
        let rows = sqlx::query_as::<_, OcrPageRow>(
            r#"
            SELECT page_number, text, confidence
            FROM ocr_pages
            WHERE result_id = ?
            ORDER BY page_number
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OcrPage::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;
    use chrono::TimeZone;

    fn result_with_pages(engine: &str, pages: Vec<OcrPage>) -> OcrResult {
        OcrResult {
            filename: "scan.pdf".to_string(),
            storage_provider: "s3".to_string(),
            engine_name: engine.to_string(),
            status: OcrStatus::Completed,
            extracted_text: String::new(),
            pages,
            confidence: 0.0,
            processed_at: Utc::now(),
            error: None,
            error_kind: None,
        }
    }

    #[tokio::test]
    async fn test_save_derives_text_and_confidence() {
        let repo = OcrResultRepository::new(setup_test_db().await);
        let result = result_with_pages(
            "tesseract",
            vec![OcrPage::new(1, "a", 0.9), OcrPage::new(2, "b", 0.7)],
        );

        repo.save_ocr_result(&result).await.unwrap();
        let loaded = repo
            .get_ocr_result("scan.pdf", "s3", "tesseract")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.extracted_text, "a\nb");
        assert!((loaded.confidence - 0.8).abs() < 1e-9);
        assert_eq!(loaded.pages.len(), 2);
        assert_eq!(loaded.status, OcrStatus::Completed);
    }

    #[tokio::test]
    async fn test_resave_replaces_pages() {
        let repo = OcrResultRepository::new(setup_test_db().await);

        let first = result_with_pages(
            "tesseract",
            vec![
                OcrPage::new(1, "one", 0.5),
                OcrPage::new(2, "two", 0.5),
                OcrPage::new(3, "three", 0.5),
            ],
        );
        repo.save_ocr_result(&first).await.unwrap();

        let second = result_with_pages("tesseract", vec![OcrPage::new(1, "only", 0.6)]);
        repo.save_ocr_result(&second).await.unwrap();

        let loaded = repo
            .get_ocr_result("scan.pdf", "s3", "tesseract")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.pages, vec![OcrPage::new(1, "only", 0.6)]);
        assert_eq!(loaded.extracted_text, "only");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ocr_results")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let (pages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ocr_pages")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(pages, 1);
    }

    #[tokio::test]
    async fn test_failed_result_round_trip() {
        let repo = OcrResultRepository::new(setup_test_db().await);
        let failed = OcrResult::failed("x.png", "azure", "easyocr", FailureKind::Storage, "missing");

        repo.save_ocr_result(&failed).await.unwrap();
        let loaded = repo
            .get_ocr_result("x.png", "azure", "easyocr")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.status, OcrStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("missing"));
        assert_eq!(loaded.error_kind, Some(FailureKind::Storage));
        assert!(loaded.pages.is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let repo = OcrResultRepository::new(setup_test_db().await);

        let mut older = result_with_pages("tesseract", vec![OcrPage::new(1, "x", 0.5)]);
        older.filename = "older.png".to_string();
        older.processed_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut newer = result_with_pages("tesseract", vec![OcrPage::new(1, "y", 0.5)]);
        newer.filename = "newer.png".to_string();
        newer.processed_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        repo.save_ocr_result(&older).await.unwrap();
        repo.save_ocr_result(&newer).await.unwrap();

        let listed = repo.list_ocr_results("s3").await.unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["newer.png", "older.png"]);
        assert!(listed.iter().all(|r| r.pages.is_empty()));

        assert!(repo.list_ocr_results("gcs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_comparison_ordered_by_engine() {
        let repo = OcrResultRepository::new(setup_test_db().await);

        repo.save_ocr_result(&result_with_pages("tesseract", vec![OcrPage::new(1, "t", 0.4)]))
            .await
            .unwrap();
        repo.save_ocr_result(&result_with_pages("easyocr", vec![OcrPage::new(1, "e", 0.9)]))
            .await
            .unwrap();

        let comparison = repo.get_ocr_comparison("scan.pdf", "s3").await.unwrap();
        let engines: Vec<_> = comparison.iter().map(|r| r.engine_name.as_str()).collect();
        assert_eq!(engines, vec!["easyocr", "tesseract"]);
        assert_eq!(comparison[0].pages.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_results_and_pages() {
        let repo = OcrResultRepository::new(setup_test_db().await);
        repo.save_ocr_result(&result_with_pages("tesseract", vec![OcrPage::new(1, "t", 0.4)]))
            .await
            .unwrap();

        assert!(repo.delete_ocr_result("scan.pdf", "s3").await.unwrap());
        assert!(!repo.delete_ocr_result("scan.pdf", "s3").await.unwrap());
        assert!(repo
            .get_ocr_result("scan.pdf", "s3", "tesseract")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_error_log() {
        let repo = OcrResultRepository::new(setup_test_db().await);
        repo.log_error("x.png", "s3", "tesseract", "db_error", "locked", 3)
            .await
            .unwrap();

        let errors = repo.list_errors("x.png", "s3").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "db_error");
        assert_eq!(errors[0].retry_count, 3);
    }
}
