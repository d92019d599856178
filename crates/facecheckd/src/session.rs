//! Application state behind the user-facing triggers.
//!
//! Holds the current reference image, the current live snapshot and the
//! result computed from exactly that pair. Replacing either input clears the
//! result under the same lock, and a verification that finishes after its
//! inputs were replaced is discarded.

use crate::engine::{EngineError, EngineHandle, ModelStatus};
use chrono::{DateTime, Utc};
use facecheck_core::{
    ImageError, ImageInput, IndeterminateReason, TaggedInput, VerificationResult,
};
use facecheck_hw::{
    CameraError, CaptureDevice, CaptureDeviceController, CaptureState, FrameSnapshotter,
    SnapshotError,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinError;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a verification is already in progress")]
    Busy,
    #[error("face models are not ready yet ({0})")]
    ModelNotReady(String),
    #[error("inputs changed while verifying; result discarded")]
    Superseded,
    #[error("reference image could not be decoded: {0}")]
    InvalidImage(#[from] ImageError),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("camera task failed: {0}")]
    CameraTask(#[from] JoinError),
    #[error("engine unavailable")]
    EngineUnavailable,
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ModelNotReady(reason) => Self::ModelNotReady(reason),
            EngineError::ChannelClosed => Self::EngineUnavailable,
        }
    }
}

/// Whether the verify trigger can be pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerState {
    /// An input is missing.
    Disabled,
    Ready,
    Verifying,
}

/// A verification result and the exact inputs it was computed from.
#[derive(Debug, Clone, Serialize)]
pub struct AttributedResult {
    pub reference_id: Option<Uuid>,
    pub snapshot_id: Option<Uuid>,
    #[serde(flatten)]
    pub result: VerificationResult,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub is_dark: bool,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceInfo {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub received_at: DateTime<Utc>,
}

/// Everything the presentation layer needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub camera: CaptureState,
    pub models: ModelStatus,
    pub trigger: TriggerState,
    pub reference: Option<ReferenceInfo>,
    pub snapshot: Option<SnapshotInfo>,
    pub result: Option<AttributedResult>,
}

struct Reference {
    tagged: TaggedInput,
    info: ReferenceInfo,
}

struct LiveSnapshot {
    tagged: TaggedInput,
    info: SnapshotInfo,
}

#[derive(Default)]
struct Inputs {
    reference: Option<Reference>,
    snapshot: Option<LiveSnapshot>,
    result: Option<AttributedResult>,
}

impl Inputs {
    fn ids(&self) -> (Option<Uuid>, Option<Uuid>) {
        (
            self.reference.as_ref().map(|r| r.tagged.id),
            self.snapshot.as_ref().map(|s| s.tagged.id),
        )
    }

    fn clear_result(&mut self) {
        if self.result.take().is_some() {
            tracing::debug!("inputs changed, previous result cleared");
        }
    }
}

pub struct Session<D> {
    inputs: Mutex<Inputs>,
    /// Only touched from blocking tasks: acquisition and frame reads block.
    camera: Arc<Mutex<CaptureDeviceController<D>>>,
    /// Last published controller state, readable without the camera lock.
    camera_state: Arc<watch::Sender<CaptureState>>,
    engine: EngineHandle,
    /// One permit: held for the whole of an in-flight verification.
    in_flight: Semaphore,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: CaptureDevice + 'static> Session<D> {
    pub fn new(camera: CaptureDeviceController<D>, engine: EngineHandle) -> Self {
        let (camera_state, _) = watch::channel(camera.state().clone());
        Self {
            inputs: Mutex::new(Inputs::default()),
            camera: Arc::new(Mutex::new(camera)),
            camera_state: Arc::new(camera_state),
            engine,
            in_flight: Semaphore::new(1),
        }
    }

    /// Run `op` against the controller on the blocking pool, then publish
    /// the resulting state while still holding the camera lock.
    async fn with_camera<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut CaptureDeviceController<D>) -> T + Send + 'static,
    {
        let camera = Arc::clone(&self.camera);
        let state = Arc::clone(&self.camera_state);
        let out = tokio::task::spawn_blocking(move || {
            let mut controller = lock(&camera);
            let out = op(&mut controller);
            state.send_replace(controller.state().clone());
            out
        })
        .await?;
        Ok(out)
    }

    /// Replace the reference image with freshly uploaded bytes.
    ///
    /// Undecodable uploads are rejected and leave the current state untouched.
    pub fn select_reference(&self, bytes: Vec<u8>) -> Result<ReferenceInfo, SessionError> {
        let decoded = ImageInput::from_bytes(bytes).decode()?;
        let tagged = TaggedInput::new(ImageInput::Decoded(decoded.clone()));
        let info = ReferenceInfo {
            id: tagged.id,
            width: decoded.width(),
            height: decoded.height(),
            received_at: tagged.received_at,
        };

        let mut inputs = lock(&self.inputs);
        inputs.reference = Some(Reference { tagged, info: info.clone() });
        inputs.clear_result();
        tracing::info!(id = %info.id, width = info.width, height = info.height, "reference image selected");
        Ok(info)
    }

    /// Acquire the camera. `status()` reports `Requesting` until it settles.
    pub async fn start_camera(&self) -> Result<(u32, u32), SessionError> {
        self.camera_state.send_replace(CaptureState::Requesting);
        Ok(self.with_camera(|camera| camera.start()).await??)
    }

    pub async fn stop_camera(&self) -> Result<(), SessionError> {
        self.with_camera(|camera| camera.stop()).await
    }

    /// Take a snapshot of the live stream and make it the current probe image.
    pub async fn capture(&self) -> Result<SnapshotInfo, SessionError> {
        let snapshot = self
            .with_camera(FrameSnapshotter::snapshot)
            .await??;
        let tagged = TaggedInput::new(ImageInput::from_bytes(snapshot.png));
        let info = SnapshotInfo {
            id: tagged.id,
            width: snapshot.width,
            height: snapshot.height,
            is_dark: snapshot.is_dark,
            captured_at: snapshot.captured_at,
        };

        let mut inputs = lock(&self.inputs);
        inputs.snapshot = Some(LiveSnapshot { tagged, info: info.clone() });
        inputs.clear_result();
        Ok(info)
    }

    /// Verify the current reference against the current snapshot.
    ///
    /// Rejected with `Busy` while another verification is in flight. If
    /// either input is replaced before the engine answers, the answer is
    /// dropped and `Superseded` is returned.
    pub async fn verify(&self) -> Result<AttributedResult, SessionError> {
        let _permit = self.in_flight.try_acquire().map_err(|_| SessionError::Busy)?;

        let (pair, ids) = {
            let inputs = lock(&self.inputs);
            let pair = match (&inputs.reference, &inputs.snapshot) {
                (Some(r), Some(s)) => Some((r.tagged.input.clone(), s.tagged.input.clone())),
                _ => None,
            };
            (pair, inputs.ids())
        };

        let result = match pair {
            Some((reference, snapshot)) => self.engine.verify(reference, snapshot).await?,
            None => VerificationResult::indeterminate(IndeterminateReason::MissingInput),
        };

        let mut inputs = lock(&self.inputs);
        if inputs.ids() != ids {
            tracing::warn!(?result, "discarding result for replaced inputs");
            return Err(SessionError::Superseded);
        }

        let attributed = AttributedResult {
            reference_id: ids.0,
            snapshot_id: ids.1,
            message: result.status_message(),
            result,
            completed_at: Utc::now(),
        };
        inputs.result = Some(attributed.clone());
        Ok(attributed)
    }

    pub fn trigger(&self) -> TriggerState {
        if self.in_flight.available_permits() == 0 {
            return TriggerState::Verifying;
        }
        match lock(&self.inputs).ids() {
            (Some(_), Some(_)) => TriggerState::Ready,
            _ => TriggerState::Disabled,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let camera = self.camera_state.borrow().clone();
        let trigger = self.trigger();
        let inputs = lock(&self.inputs);
        SessionStatus {
            camera,
            models: self.engine.status(),
            trigger,
            reference: inputs.reference.as_ref().map(|r| r.info.clone()),
            snapshot: inputs.snapshot.as_ref().map(|s| s.info.clone()),
            result: inputs.result.clone(),
        }
    }

    /// Release the camera. Called on daemon shutdown.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.stop_camera().await?;
        tracing::info!("session shut down, camera released");
        Ok(())
    }
}
