//! Clip pipeline worker binary.
//!
//! Runs upload-session maintenance until interrupted. Any arguments are
//! treated as paths to JSON extraction jobs, which are run once before the
//! worker settles into maintenance.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipline_media::{check_ffmpeg, FfmpegEncoder};
use clipline_models::ExtractionJob;
use clipline_sessions::{RedisSessionStore, UploadSessionStore};
use clipline_storage::{ObjectStorage, R2Client};
use clipline_worker::{
    metrics, run_maintenance_loop, ClipPipelineOrchestrator, MaintenanceSchedule,
    MemoryClipStore, PipelineConfig, UploadSessionManager, VideoSegmentExtractor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("clipline=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting clipline-worker");

    let config = PipelineConfig::from_env()?;
    info!("Pipeline config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(addr = %addr, "Prometheus exporter listening");
    }

    match check_ffmpeg() {
        Ok(path) => info!(path = %path.display(), "Found ffmpeg"),
        Err(e) => warn!("ffmpeg not available, clip extraction will fail: {}", e),
    }

    let storage: Arc<dyn ObjectStorage> = Arc::new(
        R2Client::from_env()
            .await
            .context("failed to create object storage client")?,
    );

    let redis = RedisSessionStore::from_env().context("failed to create session store")?;
    redis.ping().await.context("session store is unreachable")?;
    let store: Arc<dyn UploadSessionStore> = Arc::new(redis);

    let manager = Arc::new(UploadSessionManager::new(
        store,
        storage.clone(),
        config.session_ttl,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(run_maintenance_loop(
        manager,
        MaintenanceSchedule::from(&config),
        shutdown_rx.clone(),
    ));

    let job_paths: Vec<String> = std::env::args().skip(1).collect();
    if !job_paths.is_empty() {
        let encoder = FfmpegEncoder::new()
            .with_timeout(config.encoder_timeout.as_secs())
            .with_cancel(shutdown_rx);
        let extractor = VideoSegmentExtractor::from_config(Arc::new(encoder), storage, &config);
        let orchestrator = Arc::new(ClipPipelineOrchestrator::new(
            Arc::new(extractor),
            Arc::new(MemoryClipStore::new()),
            config.max_concurrent_jobs,
        ));

        let mut jobs = Vec::with_capacity(job_paths.len());
        for path in &job_paths {
            jobs.push(load_job(Path::new(path)).await?);
        }

        for (clip_id, result) in orchestrator.run_all(jobs).await {
            match result {
                Ok(record) => info!(
                    clip_id = %clip_id,
                    output = record.output_locator.as_deref().unwrap_or_default(),
                    "Clip completed"
                ),
                Err(e) => error!(clip_id = %clip_id, "Clip failed: {}", e),
            }
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    shutdown_tx.send(true).ok();
    maintenance.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}

async fn load_job(path: &Path) -> anyhow::Result<ExtractionJob> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid job file {}", path.display()))
}
