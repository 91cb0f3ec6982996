//! Configuration management for the OCR pipeline

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::queue::StorageProvider;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub ocr: OcrConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Root directory for the filesystem-backed providers
    pub local_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub sqs: SqsConfig,
    pub pubsub: PubSubConfig,
    pub azure: AzureQueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqsConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub queue_name: String,
    pub wait_time_seconds: i32,
    pub visibility_timeout: i32,
    pub message_retention_seconds: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    pub project_id: String,
    pub emulator_host: Option<String>,
    pub topic: String,
    pub subscription: String,
    pub ack_deadline_seconds: i32,
    pub channel_capacity: usize,
    pub handoff_timeout_secs: u64,
    pub dequeue_timeout_secs: u64,
    pub restart_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureQueueConfig {
    pub endpoint: String,
    pub account_name: String,
    pub account_key: String,
    pub queue_name: String,
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Engines run for every task, in order
    pub engines: Vec<String>,
    pub tesseract_language: String,
    pub easyocr_languages: String,
    pub easyocr_script_path: String,
    pub easyocr_timeout_secs: u64,
    pub pdf_dpi: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub providers: Vec<StorageProvider>,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub persist_attempts: u32,
    pub persist_backoff_ms: u64,
}

/// Well-known Azurite development account key
const AZURITE_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite:./ocr.db".to_string(),
            },
            storage: StorageConfig {
                endpoint: "http://localhost:4566".to_string(),
                bucket: "ocr-files".to_string(),
                access_key: "test".to_string(),
                secret_key: "test".to_string(),
                region: Some("us-east-1".to_string()),
                local_root: "./data".to_string(),
            },
            queue: QueueConfig {
                sqs: SqsConfig {
                    endpoint: "http://localstack:4566".to_string(),
                    region: "us-east-1".to_string(),
                    access_key: "test".to_string(),
                    secret_key: "test".to_string(),
                    queue_name: "ocr-tasks-queue".to_string(),
                    wait_time_seconds: 20,
                    visibility_timeout: 30,
                    message_retention_seconds: 345_600,
                },
                pubsub: PubSubConfig {
                    project_id: "dev-project".to_string(),
                    emulator_host: None,
                    topic: "ocr-tasks".to_string(),
                    subscription: "ocr-tasks-subscription".to_string(),
                    ack_deadline_seconds: 30,
                    channel_capacity: 10,
                    handoff_timeout_secs: 10,
                    dequeue_timeout_secs: 30,
                    restart_delay_secs: 5,
                },
                azure: AzureQueueConfig {
                    endpoint: "http://azurite:10001".to_string(),
                    account_name: "devstoreaccount1".to_string(),
                    account_key: AZURITE_ACCOUNT_KEY.to_string(),
                    queue_name: "ocr-tasks-queue".to_string(),
                    visibility_timeout_secs: 30,
                },
            },
            ocr: OcrConfig {
                engines: vec!["tesseract".to_string()],
                tesseract_language: "jpn+eng".to_string(),
                easyocr_languages: "ja,en".to_string(),
                easyocr_script_path: "/app/easyocr_script.py".to_string(),
                easyocr_timeout_secs: 60,
                pdf_dpi: 150,
            },
            worker: WorkerConfig {
                providers: vec![
                    StorageProvider::Azure,
                    StorageProvider::S3,
                    StorageProvider::Gcs,
                ],
                idle_backoff_ms: 500,
                error_backoff_ms: 1000,
                persist_attempts: 3,
                persist_backoff_ms: 1000,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT").unwrap_or(defaults.storage.endpoint),
                bucket: env::var("S3_BUCKET").unwrap_or(defaults.storage.bucket),
                access_key: env::var("S3_ACCESS_KEY").unwrap_or(defaults.storage.access_key),
                secret_key: env::var("S3_SECRET_KEY").unwrap_or(defaults.storage.secret_key),
                region: env::var("S3_REGION").ok().or(defaults.storage.region),
                local_root: env::var("LOCAL_STORAGE_ROOT").unwrap_or(defaults.storage.local_root),
            },
            queue: QueueConfig {
                sqs: SqsConfig {
                    endpoint: env::var("LOCALSTACK_ENDPOINT")
                        .unwrap_or(defaults.queue.sqs.endpoint),
                    region: env::var("AWS_REGION").unwrap_or(defaults.queue.sqs.region),
                    access_key: env::var("AWS_ACCESS_KEY_ID")
                        .unwrap_or(defaults.queue.sqs.access_key),
                    secret_key: env::var("AWS_SECRET_ACCESS_KEY")
                        .unwrap_or(defaults.queue.sqs.secret_key),
                    queue_name: env::var("SQS_QUEUE_NAME")
                        .unwrap_or(defaults.queue.sqs.queue_name),
                    ..defaults.queue.sqs
                },
                pubsub: PubSubConfig {
                    project_id: env::var("GOOGLE_CLOUD_PROJECT")
                        .unwrap_or(defaults.queue.pubsub.project_id),
                    emulator_host: env::var("PUBSUB_EMULATOR_HOST").ok(),
                    topic: env::var("PUBSUB_TOPIC").unwrap_or(defaults.queue.pubsub.topic),
                    subscription: env::var("PUBSUB_SUBSCRIPTION")
                        .unwrap_or(defaults.queue.pubsub.subscription),
                    ..defaults.queue.pubsub
                },
                azure: AzureQueueConfig {
                    endpoint: env::var("AZURE_STORAGE_ENDPOINT")
                        .map(|e| azure_queue_endpoint(&e))
                        .unwrap_or(defaults.queue.azure.endpoint),
                    account_name: env::var("AZURE_STORAGE_ACCOUNT_NAME")
                        .unwrap_or(defaults.queue.azure.account_name),
                    account_key: env::var("AZURE_STORAGE_ACCOUNT_KEY")
                        .unwrap_or(defaults.queue.azure.account_key),
                    queue_name: env::var("AZURE_QUEUE_NAME")
                        .unwrap_or(defaults.queue.azure.queue_name),
                    ..defaults.queue.azure
                },
            },
            ocr: OcrConfig {
                engines: env::var("OCR_ENGINES")
                    .map(|v| parse_list(&v))
                    .ok()
                    .filter(|v| !v.is_empty())
                    .unwrap_or(defaults.ocr.engines),
                tesseract_language: env::var("TESSERACT_LANGUAGE")
                    .unwrap_or(defaults.ocr.tesseract_language),
                easyocr_languages: env::var("EASYOCR_LANGUAGES")
                    .unwrap_or(defaults.ocr.easyocr_languages),
                easyocr_script_path: env::var("EASYOCR_SCRIPT_PATH")
                    .unwrap_or(defaults.ocr.easyocr_script_path),
                ..defaults.ocr
            },
            worker: WorkerConfig {
                providers: env::var("WORKER_PROVIDERS")
                    .map(|v| {
                        parse_list(&v)
                            .iter()
                            .filter_map(|p| p.parse().ok())
                            .collect::<Vec<StorageProvider>>()
                    })
                    .ok()
                    .filter(|v| !v.is_empty())
                    .unwrap_or(defaults.worker.providers),
                ..defaults.worker
            },
        })
    }
}

impl WorkerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Azurite serves blobs on 10000 and queues on 10001; a blob endpoint is rewritten.
fn azure_queue_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').replace(":10000", ":10001")
}
