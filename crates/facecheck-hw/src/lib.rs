//! facecheck-hw — Live camera access for face verification.
//!
//! Capability traits for capture devices, a V4L2 implementation, the
//! capture lifecycle controller, and still-frame snapshots.

pub mod camera;
pub mod controller;
pub mod frame;
pub mod snapshot;

pub use camera::{
    list_devices, CameraError, CaptureDevice, DeviceInfo, Facing, PixelFormat, StreamConstraints,
    V4l2Device, VideoStream,
};
pub use controller::{CaptureDeviceController, CaptureSession, CaptureState, PreviewSink};
pub use frame::Frame;
pub use snapshot::{FrameSnapshotter, Snapshot, SnapshotError};
