//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- One current result per (file, provider, engine)
CREATE TABLE IF NOT EXISTS ocr_results (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    storage_provider TEXT NOT NULL,
    engine_name TEXT NOT NULL,
    status TEXT NOT NULL,
    extracted_text TEXT NOT NULL DEFAULT '',
    average_confidence REAL NOT NULL DEFAULT 0,
    error_message TEXT,
    error_kind TEXT,
    processed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(filename, storage_provider, engine_name)
);

CREATE INDEX IF NOT EXISTS idx_ocr_results_provider ON ocr_results(storage_provider, processed_at);

-- Pages are replaced wholesale on every save
CREATE TABLE IF NOT EXISTS ocr_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    result_id TEXT NOT NULL REFERENCES ocr_results(id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 0,
    UNIQUE(result_id, page_number)
);

CREATE INDEX IF NOT EXISTS idx_ocr_pages_result ON ocr_pages(result_id);

-- Secondary log of processing and persistence failures
CREATE TABLE IF NOT EXISTS ocr_error_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    storage_provider TEXT NOT NULL,
    engine_name TEXT NOT NULL,
    error_type TEXT NOT NULL,
    error_message TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ocr_error_logs_file ON ocr_error_logs(filename, storage_provider);

-- Where uploaded files live in storage
CREATE TABLE IF NOT EXISTS file_metadata (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    namespace TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    storage_provider TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    UNIQUE(filename, storage_provider)
);

-- Queue task lifecycle audit log
CREATE TABLE IF NOT EXISTS queue_tasks (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    storage_provider TEXT NOT NULL,
    status TEXT NOT NULL,
    enqueued_at TEXT,
    dequeued_at TEXT,
    processed_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_tasks_lookup ON queue_tasks(filename, storage_provider, status);
CREATE INDEX IF NOT EXISTS idx_queue_tasks_status ON queue_tasks(storage_provider, status);
"#;
