use crate::engine::{WorkerError, WorkerHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tally_core::{dashboard_rows, Config, Ledger, RecognizerError};
use zbus::{fdo, interface};

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.tally.Attendance1
/// Object path: /org/tally/Attendance1
pub struct AttendanceService {
    worker: WorkerHandle,
    ledger: Arc<Ledger>,
    config: Config,
}

impl AttendanceService {
    pub fn new(worker: WorkerHandle, ledger: Arc<Ledger>, config: Config) -> Self {
        Self {
            worker,
            ledger,
            config,
        }
    }
}

#[interface(name = "org.tally.Attendance1")]
impl AttendanceService {
    /// Recognise the faces in an image file and log them. Returns the frame report as JSON.
    async fn record_image(&self, path: &str) -> fdo::Result<String> {
        tracing::info!(path, "record_image requested");
        let report = self
            .worker
            .process_image(PathBuf::from(path))
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Today's attendance rows as a JSON array.
    async fn todays_records(&self) -> fdo::Result<String> {
        let ledger = Arc::clone(&self.ledger);
        let rows = tokio::task::spawn_blocking(move || {
            dashboard_rows(ledger.records(), ledger.now(), |p| p.exists())
        })
        .await
        .map_err(|e| fdo::Error::Failed(e.to_string()))?;
        to_json(&rows)
    }

    /// Reload the known-faces directory. Returns the number of faces loaded.
    async fn reload_known_faces(&self) -> fdo::Result<u32> {
        tracing::info!("reload requested");
        let count = self.worker.reload().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "known_faces": self.worker.known_faces(),
            "ledger": self.ledger.path(),
            "known_faces_dir": self.config.known_faces_dir,
            "tolerance": self.config.tolerance,
            "debounce_secs": self.config.debounce_secs,
        })
        .to_string())
    }
}

fn to_fdo(err: WorkerError) -> fdo::Error {
    match err {
        WorkerError::Recognizer(RecognizerError::Image(e)) => fdo::Error::InvalidArgs(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}
