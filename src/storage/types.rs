//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub storage_path: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Outcome of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub filename: String,
    pub storage_path: String,
    pub size: i64,
}
