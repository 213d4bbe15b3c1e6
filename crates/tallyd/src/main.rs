use anyhow::{Context, Result};
use std::sync::Arc;
use tally_core::{Config, Ledger, Recognizer};
use tally_vision::OnnxEngine;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.tally.Attendance1";
const OBJECT_PATH: &str = "/org/tally/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tallyd starting");

    let config = Config::load()?;
    config.ensure_dirs().context("creating data directories")?;
    tracing::info!(
        ledger = %config.ledger_path.display(),
        known_faces = %config.known_faces_dir.display(),
        tolerance = config.tolerance,
        debounce_secs = config.debounce_secs,
        "configuration loaded"
    );

    // Models load up front so a missing file fails startup, not the first request.
    let face_engine = OnnxEngine::from_config(&config)
        .map_err(|e| anyhow::anyhow!("loading face models from {}: {e}", config.model_dir.display()))?;

    let ledger = Arc::new(Ledger::new(&config));
    let mut recognizer = Recognizer::new(face_engine, Arc::clone(&ledger), &config);
    let known = recognizer.reload_known_faces();
    if known == 0 {
        tracing::warn!(dir = %config.known_faces_dir.display(), "no known faces; every face will be logged as unknown");
    }

    let (worker, worker_thread) = engine::spawn_worker(recognizer)?;
    let service = dbus_interface::AttendanceService::new(worker, ledger, config);

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, known, "tallyd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("tallyd shutting down");

    // The service owns the last worker handle; removing it closes the
    // channel and lets the worker finish its current request.
    connection
        .object_server()
        .remove::<dbus_interface::AttendanceService, _>(OBJECT_PATH)
        .await?;
    drop(connection);
    tokio::task::spawn_blocking(move || worker_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;

    Ok(())
}
