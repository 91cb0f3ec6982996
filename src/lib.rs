//! OCR Pipeline
//!
//! Queue-driven document OCR. Uploads are queued per storage provider
//! (SQS, Pub/Sub, Azure Queue Storage, or an in-process fallback) and a
//! worker per provider downloads each file, runs the configured OCR engines
//! and stores the results in SQLite.
//!
//! # Modules
//!
//! - `queue`: queue backends and the manager that owns them
//! - `ocr`: engines, PDF rasterisation and the dispatching service
//! - `db`: OCR results, the queue task audit log and file metadata
//! - `storage`: S3 and filesystem storage
//! - `worker`: per-provider processing loop
//! - `api`: caller-facing operations

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ocr;
pub mod queue;
pub mod state;
pub mod storage;
pub mod worker;
