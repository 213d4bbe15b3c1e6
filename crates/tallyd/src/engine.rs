use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tally_core::{FaceEngine, FrameReport, Recognizer, RecognizerError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("worker thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the worker thread.
enum Request {
    ProcessImage {
        path: PathBuf,
        reply: oneshot::Sender<Result<FrameReport, RecognizerError>>,
    },
    Reload {
        reply: oneshot::Sender<usize>,
    },
}

/// Clone-safe handle to the recognition worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Request>,
    known: Arc<AtomicUsize>,
}

impl WorkerHandle {
    /// Decode the image at `path`, recognise every face in it and log the sightings.
    pub async fn process_image(&self, path: PathBuf) -> Result<FrameReport, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ProcessImage { path, reply }).await?;
        Ok(rx.await.map_err(|_| WorkerError::ChannelClosed)??)
    }

    /// Re-read the known-faces directory. Returns the number of entries loaded.
    pub async fn reload(&self) -> Result<usize, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Reload { reply }).await?;
        rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Known-face count as of the last load.
    pub fn known_faces(&self) -> usize {
        self.known.load(Ordering::Relaxed)
    }

    async fn send(&self, request: Request) -> Result<(), WorkerError> {
        self.tx.send(request).await.map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Run `recognizer` on a dedicated OS thread.
///
/// The thread exits once every [`WorkerHandle`] is dropped, after finishing
/// the request in progress. Join the returned handle to wait for that.
pub fn spawn_worker<E>(mut recognizer: Recognizer<E>) -> Result<(WorkerHandle, JoinHandle<()>), WorkerError>
where
    E: FaceEngine + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Request>(4);
    let known = Arc::new(AtomicUsize::new(recognizer.known_faces().len()));
    let known_in_worker = Arc::clone(&known);

    let thread = std::thread::Builder::new()
        .name("tally-worker".into())
        .spawn(move || {
            tracing::info!("worker thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    Request::ProcessImage { path, reply } => {
                        let result = recognizer.process_image(&path);
                        match &result {
                            Ok(report) => tracing::info!(
                                path = %path.display(),
                                faces = report.faces.len(),
                                logged = report.logged(),
                                "image processed"
                            ),
                            Err(err) => tracing::warn!(path = %path.display(), error = %err, "image rejected"),
                        }
                        let _ = reply.send(result);
                    }
                    Request::Reload { reply } => {
                        let count = recognizer.reload_known_faces();
                        known_in_worker.store(count, Ordering::Relaxed);
                        tracing::info!(count, "known faces reloaded");
                        let _ = reply.send(count);
                    }
                }
            }
            tracing::info!("worker thread exiting");
        })
        .map_err(WorkerError::Spawn)?;

    Ok((WorkerHandle { tx, known }, thread))
}
