//! Movie composition worker binary.
//!
//! `reel-worker [MANIFEST.json ...]`
//!
//! With manifests, registers each manifest's scenes, composes them and exits
//! once every job has settled. Without arguments, runs the worker pool until
//! Ctrl-C.

use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::{check_ffmpeg, check_ffprobe, FfmpegEncoder, MediaResult};
use reel_models::{CompositionOptions, JobId, Scene};
use reel_queue::{CompositionQueue, QueueConfig};
use reel_worker::{metrics, InMemoryJobStore, InMemorySceneCatalog, QueueService, WorkerConfig};

const CLEAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One composition request read from disk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    user_id: String,
    project_id: String,
    scenes: Vec<Scene>,
    #[serde(default)]
    options: CompositionOptions,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        match metrics::init_metrics(addr) {
            Ok(()) => info!(%addr, "Serving Prometheus metrics"),
            Err(e) => warn!("Metrics exporter disabled: {}", e),
        }
    }

    let checks: [fn() -> MediaResult<PathBuf>; 2] = [check_ffmpeg, check_ffprobe];
    for check in checks {
        if let Err(e) = check() {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let queue = match CompositionQueue::connect(QueueConfig::from_env()).await {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create composition queue: {}", e);
            std::process::exit(1);
        }
    };

    let catalog = Arc::new(InMemorySceneCatalog::new());
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder_timeout));
    let service = QueueService::new(
        config,
        queue,
        Arc::new(InMemoryJobStore::new()),
        catalog.clone(),
        encoder,
    );

    if let Err(e) = service.start().await {
        error!("Failed to start worker pool: {}", e);
        std::process::exit(1);
    }

    let manifests: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let exit_code = if manifests.is_empty() {
        run_until_signal(&service).await;
        0
    } else {
        match compose_manifests(&service, &catalog, &manifests).await {
            Ok(true) => 0,
            Ok(false) => 2,
            Err(e) => {
                error!("{:#}", e);
                1
            }
        }
    };

    service.stop().await;
    info!("Worker shutdown complete");

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "reel=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

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
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Serve until Ctrl-C, cleaning old queue entries every hour.
async fn run_until_signal(service: &QueueService) {
    let mut clean_tick = tokio::time::interval(CLEAN_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = clean_tick.tick() => {
                let counts = service.admin().status().await;
                info!(
                    waiting = counts.waiting,
                    active = counts.active,
                    completed = counts.completed,
                    failed = counts.failed,
                    "Queue status"
                );
                if let Err(e) = service.admin().clean_default().await {
                    warn!("Queue cleanup failed: {}", e);
                }
            }
        }
    }
}

/// Submit every manifest and wait for all jobs to settle. Returns whether
/// every job completed.
async fn compose_manifests(
    service: &QueueService,
    catalog: &InMemorySceneCatalog,
    paths: &[PathBuf],
) -> anyhow::Result<bool> {
    let mut submitted: Vec<(JobId, String)> = Vec::with_capacity(paths.len());

    for path in paths {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;

        catalog
            .insert_project(manifest.project_id.clone(), manifest.scenes)
            .await;
        let (job_id, entry_id) = service
            .submit(&manifest.user_id, &manifest.project_id, manifest.options)
            .await
            .with_context(|| format!("submitting {}", path.display()))?;

        info!(job_id = %job_id, entry_id = %entry_id, manifest = %path.display(), "Submitted");
        submitted.push((job_id, manifest.user_id));
    }

    let poll = service.config().poll_interval;
    let mut all_completed = true;
    for (job_id, user_id) in &submitted {
        let view = loop {
            let view = service
                .job_status(job_id, user_id)
                .await?
                .with_context(|| format!("job {job_id} disappeared"))?;
            if view.status.is_terminal() {
                break view;
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted"),
                _ = tokio::time::sleep(poll) => {}
            }
        };

        all_completed &= view.error.is_none();
        let line = serde_json::json!({ "jobId": job_id, "result": view });
        println!("{line}");
    }

    Ok(all_completed)
}
