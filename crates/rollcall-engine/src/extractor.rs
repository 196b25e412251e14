//! Extraction worker thread.
//!
//! Model sessions are neither `Sync` nor cheap to construct, so one backend
//! lives on a dedicated OS thread and serves requests over a channel. Callers
//! hold a cloneable [`ExtractorHandle`] and await a oneshot reply.

use rollcall_core::{DetectedFace, ExtractError, FaceExtractor, ProbeFace};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const QUEUE_DEPTH: usize = 4;

type Reply<T> = oneshot::Sender<Result<T, ExtractError>>;

enum ExtractRequest {
    Largest { image: Vec<u8>, reply: Reply<ProbeFace> },
    All { image: Vec<u8>, reply: Reply<Vec<DetectedFace>> },
}

/// Clone-safe handle to the extraction thread.
#[derive(Clone)]
pub struct ExtractorHandle {
    tx: mpsc::Sender<ExtractRequest>,
    timeout: Duration,
    backend: &'static str,
}

impl ExtractorHandle {
    /// Extract the largest face in `image`.
    ///
    /// A timeout or a dead worker is reported as `NoFaceDetected`.
    pub async fn extract(&self, image: Vec<u8>) -> Result<ProbeFace, ExtractError> {
        let bytes = image.len();
        self.request(bytes, |reply| ExtractRequest::Largest { image, reply })
            .await
    }

    /// Extract every face in `image`, largest first.
    pub async fn extract_all(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, ExtractError> {
        let bytes = image.len();
        self.request(bytes, |reply| ExtractRequest::All { image, reply })
            .await
    }

    async fn request<T>(
        &self,
        bytes: usize,
        build: impl FnOnce(Reply<T>) -> ExtractRequest,
    ) -> Result<T, ExtractError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx.send(build(reply_tx)).await.map_err(|_| WorkerGone)?;
            let result = reply_rx.await.map_err(|_| WorkerGone)?;
            Ok::<_, WorkerGone>(result)
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(result)) => result,
            Ok(Err(WorkerGone)) => {
                tracing::error!(backend = self.backend, "extraction thread exited");
                Err(ExtractError::NoFaceDetected)
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.backend,
                    bytes,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "extraction timed out"
                );
                Err(ExtractError::NoFaceDetected)
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

struct WorkerGone;

/// Move `backend` onto its own thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_extractor(
    mut backend: Box<dyn FaceExtractor>,
    timeout: Duration,
) -> std::io::Result<ExtractorHandle> {
    let name = backend.name();
    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("rollcall-extractor".into())
        .spawn(move || {
            tracing::info!(backend = name, "extraction thread started");
            while let Some(request) = rx.blocking_recv() {
                // Receivers may have timed out already.
                match request {
                    ExtractRequest::Largest { image, reply } => {
                        let result = backend.extract(&image);
                        match &result {
                            Ok(face) => tracing::debug!(
                                faces = face.faces_detected,
                                dim = face.embedding.dim(),
                                "face extracted"
                            ),
                            Err(e) => tracing::debug!(error = %e, "face extraction failed"),
                        }
                        let _ = reply.send(result);
                    }
                    ExtractRequest::All { image, reply } => {
                        let result = backend.extract_all(&image);
                        match &result {
                            Ok(faces) => tracing::debug!(faces = faces.len(), "faces extracted"),
                            Err(e) => tracing::debug!(error = %e, "face extraction failed"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!(backend = name, "extraction thread exiting");
        })?;

    Ok(ExtractorHandle {
        tx,
        timeout,
        backend: name,
    })
}
