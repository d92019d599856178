//! Still snapshots of the live stream.

use crate::camera::{CameraError, CaptureDevice};
use crate::controller::CaptureDeviceController;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("camera is not streaming")]
    NotStreaming,
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("frame buffer does not match {width}x{height}")]
    MalformedFrame { width: u32, height: u32 },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),
}

/// A self-contained still image taken from the live stream.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    /// PNG-encoded grayscale frame.
    pub png: Vec<u8>,
    pub sequence: u32,
    pub is_dark: bool,
    pub captured_at: DateTime<Utc>,
}

/// Takes snapshots without touching the controller's lifecycle state.
pub struct FrameSnapshotter;

impl FrameSnapshotter {
    /// Grab the current frame at its intrinsic size and encode it as PNG.
    pub fn snapshot<D: CaptureDevice>(
        controller: &mut CaptureDeviceController<D>,
    ) -> Result<Snapshot, SnapshotError> {
        let session = controller.session_mut().ok_or(SnapshotError::NotStreaming)?;
        let frame = session.grab_frame()?;

        let (width, height) = (frame.width, frame.height);
        let (sequence, is_dark) = (frame.sequence, frame.is_dark);
        let image = frame
            .into_gray_image()
            .ok_or(SnapshotError::MalformedFrame { width, height })?;

        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;

        if is_dark {
            tracing::warn!(sequence, "snapshot is mostly dark");
        }
        tracing::info!(width, height, sequence, "snapshot captured");

        Ok(Snapshot {
            width,
            height,
            png: png.into_inner(),
            sequence,
            is_dark,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StreamConstraints;
    use crate::controller::tests::FakeDevice;
    use crate::controller::CaptureState;

    #[test]
    fn test_snapshot_requires_streaming() {
        let mut controller =
            CaptureDeviceController::new(FakeDevice::default(), StreamConstraints::default());
        assert!(matches!(
            FrameSnapshotter::snapshot(&mut controller),
            Err(SnapshotError::NotStreaming)
        ));

        controller.start().unwrap();
        controller.stop();
        assert!(matches!(
            FrameSnapshotter::snapshot(&mut controller),
            Err(SnapshotError::NotStreaming)
        ));
    }

    #[test]
    fn test_snapshot_uses_intrinsic_size_not_preference() {
        let constraints = StreamConstraints {
            preferred_width: 1920,
            preferred_height: 1080,
            ..StreamConstraints::default()
        };
        let mut controller = CaptureDeviceController::new(FakeDevice::sized(64, 48), constraints);
        controller.start().unwrap();

        let snapshot = FrameSnapshotter::snapshot(&mut controller).unwrap();

        assert_eq!((snapshot.width, snapshot.height), (64, 48));
        let decoded = image::load_from_memory(&snapshot.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert!(!snapshot.is_dark);
    }

    #[test]
    fn test_snapshot_leaves_state_alone() {
        let mut controller =
            CaptureDeviceController::new(FakeDevice::sized(8, 8), StreamConstraints::default());
        controller.start().unwrap();

        let first = FrameSnapshotter::snapshot(&mut controller).unwrap();
        let second = FrameSnapshotter::snapshot(&mut controller).unwrap();

        assert_eq!(controller.state(), &CaptureState::Streaming);
        assert!(second.sequence > first.sequence);
    }
}
