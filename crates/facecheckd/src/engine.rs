use facecheck_core::{EmbeddingEngine, ImageInput, VerificationResult, Verifier};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("face models not ready: {0}")]
    ModelNotReady(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Readiness of the embedding models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Messages sent from the session to the engine thread.
enum EngineRequest {
    Verify {
        reference: ImageInput,
        snapshot: ImageInput,
        reply: oneshot::Sender<VerificationResult>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    status: watch::Receiver<ModelStatus>,
}

impl EngineHandle {
    pub fn status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    /// Run one verification on the engine thread.
    ///
    /// Fails immediately with `ModelNotReady` while models are loading or
    /// after they failed to load, instead of queueing behind the load.
    pub async fn verify(
        &self,
        reference: ImageInput,
        snapshot: ImageInput,
    ) -> Result<VerificationResult, EngineError> {
        match self.status() {
            ModelStatus::Ready => {}
            ModelStatus::Loading => {
                return Err(EngineError::ModelNotReady("still loading".into()));
            }
            ModelStatus::Failed(reason) => return Err(EngineError::ModelNotReady(reason)),
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                reference,
                snapshot,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Owns the status sender on the engine thread. However the thread ends,
/// a `Ready` status flips to `Failed` so callers get a typed rejection.
struct StatusGuard(watch::Sender<ModelStatus>);

impl StatusGuard {
    fn set(&self, status: ModelStatus) {
        self.0.send_replace(status);
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.0.send_if_modified(|status| {
            if *status != ModelStatus::Ready {
                return false;
            }
            tracing::error!("engine thread exited, models unavailable");
            *status = ModelStatus::Failed("engine thread exited".into());
            true
        });
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `init` loads the models on that thread; until it returns the handle
/// reports `Loading`. Inference never runs on the async runtime.
pub fn spawn_engine<E, F>(init: F, threshold: f32) -> std::io::Result<EngineHandle>
where
    E: EmbeddingEngine + 'static,
    F: FnOnce() -> Result<E, facecheck_core::EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (status_tx, status_rx) = watch::channel(ModelStatus::Loading);

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            let status = StatusGuard(status_tx);
            tracing::info!("engine thread started, loading models");
            let engine = match init() {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load face models");
                    status.set(ModelStatus::Failed(e.to_string()));
                    return;
                }
            };
            let mut verifier = Verifier::new(engine, threshold);
            status.set(ModelStatus::Ready);
            tracing::info!(threshold, "engine ready");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify {
                        reference,
                        snapshot,
                        reply,
                    } => {
                        let result = verifier.verify(Some(&reference), Some(&snapshot));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        status: status_rx,
    })
}
