//! Vouch HTTP service.
//!
//! ```text
//! main() -> config -> SqliteSessionStore + ArtifactPipeline + GeminiDecisionEngine
//!        -> Vouch -> axum router (/api/v1) + retention job -> graceful shutdown
//! ```

mod routes;

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vouch_config::{ApiKey, VouchConfig};
use vouch_decision::{
    DecisionEngine, DecisionError, DecisionFut, DecisionRequest, GeminiDecisionEngine,
    GeminiSettings, PromptTemplates,
};
use vouch_engine::{RetentionPolicy, Vouch, VouchOptions};
use vouch_media::{
    ArtifactPipeline, DisabledFaceDetector, FaceDetector, FfmpegFrameSource, PipelineSettings,
    SeetaFaceDetector, StorageLayout,
};
use vouch_store::SqliteSessionStore;
use vouch_types::SessionId;

fn init_tracing(log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut warning = None;
    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warning = Some(format!("failed to create log dir {}: {e}", parent.display()));
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter)
                    .init();
                tracing::info!(path = %path.display(), "logging initialized");
                if let Some(warning) = warning {
                    tracing::warn!("{warning}");
                }
                return;
            }
            Err(e) => warning = Some(format!("failed to open log file {}: {e}", path.display())),
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    if let Some(warning) = warning {
        tracing::warn!("{warning}; logging to stderr");
    }
}

/// Stands in when no API key is configured so the rest of the service still runs.
struct MissingApiKey;

impl DecisionEngine for MissingApiKey {
    fn decide<'a>(&'a self, _session: SessionId, _request: &'a DecisionRequest) -> DecisionFut<'a> {
        Box::pin(async {
            Err(DecisionError::Unavailable(
                "no decision API key configured".to_string(),
            ))
        })
    }
}

fn decision_engine(config: &VouchConfig) -> Result<Arc<dyn DecisionEngine>> {
    let decision = &config.decision;
    let Some(api_key) = decision.api_key.as_ref().map(ApiKey::expose) else {
        tracing::warn!("no decision API key configured; verify will fail until one is set");
        return Ok(Arc::new(MissingApiKey));
    };
    let prompts = PromptTemplates::load(decision.prompts_dir.as_deref())
        .context("failed to load prompt templates")?;
    let engine = GeminiDecisionEngine::new(
        GeminiSettings {
            api_key: api_key.to_string(),
            model: decision.model.clone(),
            base_url: decision.base_url.clone(),
            timeout: decision.timeout,
            max_output_tokens: decision.max_output_tokens,
            temperature: decision.temperature,
        },
        prompts,
    )?;
    tracing::info!(model = %decision.model, "decision engine ready");
    Ok(Arc::new(engine))
}

fn artifact_pipeline(config: &VouchConfig) -> Result<ArtifactPipeline> {
    let media = &config.media;
    let frames = FfmpegFrameSource::locate(media.ffmpeg_binary.as_deref(), media.ffprobe_binary.as_deref())
        .context("ffmpeg and ffprobe are required for keyframe extraction")?;
    let faces: Arc<dyn FaceDetector> = match &media.face_model_path {
        Some(path) => Arc::new(
            SeetaFaceDetector::new(path).context("failed to load face detection model")?,
        ),
        None => {
            tracing::warn!("no face model configured; every selfie will score 0");
            Arc::new(DisabledFaceDetector)
        }
    };
    Ok(ArtifactPipeline::new(
        StorageLayout::new(&config.storage.media_root),
        Arc::new(frames),
        faces,
        PipelineSettings {
            keyframe_count: media.keyframe_count,
            thumbnail_box: media.thumbnail_box,
            sharpness_scale: media.sharpness_scale,
        },
    ))
}

fn build_service(config: &VouchConfig) -> Result<Vouch> {
    let store = SqliteSessionStore::open(&config.storage.database_path).with_context(|| {
        format!(
            "failed to open database {}",
            config.storage.database_path.display()
        )
    })?;
    let options = VouchOptions {
        worker_threads: config.media.worker_threads,
        decision_timeout: config.decision.timeout,
        default_callback_url: config.session.default_callback_url.clone(),
        retention: RetentionPolicy {
            raw_ttl: config.retention.raw_ttl,
            interval: config.retention.sweep_interval,
        },
    };
    Ok(Vouch::new(
        Arc::new(store),
        Arc::new(artifact_pipeline(config)?),
        decision_engine(config)?,
        options,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_path) = VouchConfig::load().context("failed to load configuration")?;
    init_tracing(config.log.file.as_deref());
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
        None => tracing::info!("no configuration file found; using defaults"),
    }

    let vouch = Arc::new(build_service(&config)?);
    let retention = vouch.retention().start();

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(addr = %config.server.bind, "listening");

    let served = axum::serve(listener, routes::router(Arc::clone(&vouch)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    retention.shutdown().await;
    served.context("server error")?;
    tracing::info!("stopped");
    Ok(())
}
