use anyhow::Result;
use facecheck_core::OnnxEmbeddingEngine;
use facecheck_hw::{CaptureDeviceController, V4l2Device};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod session;

use config::Config;
use dbus_interface::{FaceCheckService, BUS_NAME, OBJECT_PATH};
use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        threshold = config.match_threshold,
        "facecheckd starting"
    );

    // Models load in the background; verify fails fast until they are ready.
    let model_dir = config.model_dir.clone();
    let engine = engine::spawn_engine(
        move || OnnxEmbeddingEngine::initialize(&model_dir),
        config.match_threshold,
    )?;

    let camera = CaptureDeviceController::new(
        V4l2Device::new(config.camera_device.clone(), config.warmup_frames),
        config.stream_constraints(),
    );
    let session = Arc::new(Session::new(camera, engine));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceCheckService::new(Arc::clone(&session)))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facecheckd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facecheckd shutting down");
    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "camera release failed during shutdown");
    }

    Ok(())
}
