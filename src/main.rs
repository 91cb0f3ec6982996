//! OCR Worker
//!
//! Runs one OCR worker per configured storage provider until Ctrl+C or
//! SIGTERM.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_pipeline::config::Config;
use ocr_pipeline::db;
use ocr_pipeline::ocr::OcrService;
use ocr_pipeline::queue::{CloudQueueFactory, QueueManager, StorageProvider};
use ocr_pipeline::state::AppState;
use ocr_pipeline::storage::{LocalStorage, S3Storage, StorageRegistry};
use ocr_pipeline::worker::OcrWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_pipeline=debug,ocr_worker=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting OCR worker v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Providers: {:?}", config.worker.providers);
    tracing::info!("Engines: {:?}", config.ocr.engines);

    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let storage = build_storage(&config).await?;
    let queue_manager = QueueManager::new(CloudQueueFactory::new(config.queue.clone()));
    let ocr = OcrService::from_config(&config.ocr);

    let state = AppState::new(config.clone(), db_pool, queue_manager, storage, ocr);

    let cancel = CancellationToken::new();
    let mut workers = Vec::new();
    for provider in &config.worker.providers {
        let worker = OcrWorker::new(state.clone(), *provider);
        workers.push(tokio::spawn(worker.run(cancel.clone())));
    }

    shutdown_signal().await;
    cancel.cancel();

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Worker task failed: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// S3 for `s3`; the filesystem stands in for GCS and Azure blob storage
async fn build_storage(config: &Config) -> anyhow::Result<StorageRegistry> {
    let mut registry = StorageRegistry::new();
    let root = Path::new(&config.storage.local_root);

    for provider in &config.worker.providers {
        registry = match provider {
            StorageProvider::S3 => {
                tracing::info!("S3 endpoint: {}", config.storage.endpoint);
                tracing::info!("S3 bucket: {}", config.storage.bucket);
                let s3 = S3Storage::new(&config.storage)
                    .await
                    .context("Failed to initialize S3 storage")?;
                registry.with(*provider, Arc::new(s3))
            }
            StorageProvider::Gcs | StorageProvider::Azure => {
                let dir = root.join(provider.as_str());
                tracing::info!("{} storage at {}", provider, dir.display());
                registry.with(*provider, Arc::new(LocalStorage::new(dir)))
            }
        };
    }

    Ok(registry)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
