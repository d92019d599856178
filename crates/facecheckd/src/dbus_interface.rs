use crate::session::{Session, SessionError};
use facecheck_hw::{CameraError, V4l2Device};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facecheck.FaceCheck1";
pub const OBJECT_PATH: &str = "/org/facecheck/FaceCheck1";

/// D-Bus interface for the facecheck daemon.
///
/// Bus name: org.facecheck.FaceCheck1
/// Object path: /org/facecheck/FaceCheck1
pub struct FaceCheckService {
    session: Arc<Session<V4l2Device>>,
}

impl FaceCheckService {
    pub fn new(session: Arc<Session<V4l2Device>>) -> Self {
        Self { session }
    }
}

impl From<SessionError> for zbus::fdo::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Camera(CameraError::AccessDenied(_)) => {
                zbus::fdo::Error::AccessDenied(e.to_string())
            }
            SessionError::InvalidImage(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
            SessionError::Busy | SessionError::ModelNotReady(_) => {
                zbus::fdo::Error::LimitsExceeded(e.to_string())
            }
            _ => zbus::fdo::Error::Failed(e.to_string()),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facecheck.FaceCheck1")]
impl FaceCheckService {
    /// Replace the reference image with encoded image bytes (PNG, JPEG, ...).
    async fn select_reference(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "select_reference requested");
        let info = self.session.select_reference(image)?;
        to_json(&info)
    }

    /// Acquire the camera; returns the negotiated frame size.
    async fn start_camera(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start_camera requested");
        let (width, height) = self.session.start_camera().await?;
        to_json(&serde_json::json!({ "width": width, "height": height }))
    }

    async fn stop_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_camera requested");
        Ok(self.session.stop_camera().await?)
    }

    /// Snapshot the live stream as the probe image.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture requested");
        let info = self.session.capture().await?;
        to_json(&info)
    }

    /// Compare the reference image with the last snapshot.
    async fn verify(&self) -> zbus::fdo::Result<String> {
        tracing::info!("verify requested");
        let outcome = self.session.verify().await.map_err(|e| {
            tracing::warn!(error = %e, "verify rejected");
            zbus::fdo::Error::from(e)
        })?;
        to_json(&outcome)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": self.session.status(),
        }))
    }
}
