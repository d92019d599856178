//! Camera capability traits and the V4L2 implementation.

use crate::frame::{self, Frame, FrameError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const MMAP_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera access denied: {0}")]
    AccessDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("stream already stopped")]
    StreamStopped,
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    User,
    Environment,
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(Self::User),
            "environment" | "back" | "rear" => Ok(Self::Environment),
            other => Err(format!("unknown facing mode: {other}")),
        }
    }
}

/// What to ask the device for. Sizes are hints; the driver has the last word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub facing: Facing,
    pub preferred_width: u32,
    pub preferred_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: Facing::User,
            preferred_width: 640,
            preferred_height: 480,
        }
    }
}

/// A live video stream acquired from a [`CaptureDevice`].
pub trait VideoStream: Send {
    /// Intrinsic frame size as negotiated with the device.
    fn dimensions(&self) -> (u32, u32);

    /// Pull the next frame from the stream.
    fn grab_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop every track and release the device. Idempotent.
    fn stop(&mut self);
}

/// Something that can hand out exclusive video streams.
pub trait CaptureDevice: Send {
    fn request_stream(
        &mut self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            Self::Grey => frame::grey_to_grayscale(buf, width, height),
            Self::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

/// A V4L2 video node, e.g. `/dev/video0`.
#[derive(Debug, Clone)]
pub struct V4l2Device {
    path: String,
    warmup_frames: usize,
}

impl V4l2Device {
    pub fn new(path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            path: path.into(),
            warmup_frames,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open(&self) -> Result<Device, CameraError> {
        if !Path::new(&self.path).exists() {
            return Err(CameraError::DeviceNotFound(self.path.clone()));
        }

        Device::with_path(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::AccessDenied(format!("{}: {e}", self.path))
            } else if e.to_string().contains("busy") || e.raw_os_error() == Some(16) {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{}: {e}", self.path))
            }
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn request_stream(
        &mut self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        let device = self.open()?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        tracing::info!(
            device = %self.path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        // V4L2 nodes are fixed to one sensor; facing is only meaningful on multi-camera hosts.
        tracing::debug!(facing = ?constraints.facing, "facing hint not applicable to V4L2");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.preferred_width;
        fmt.height = constraints.preferred_height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            requested_width = constraints.preferred_width,
            requested_height = constraints.preferred_height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = V4l2Stream {
            device: Some(device),
            path: self.path.clone(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        };

        // Let auto-exposure settle before anyone snapshots.
        for _ in 0..self.warmup_frames {
            if let Err(e) = stream.grab_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }

        Ok(Box::new(stream))
    }
}

/// An open V4L2 device. Dropping the `Device` closes the node.
struct V4l2Stream {
    device: Option<Device>,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl VideoStream for V4l2Stream {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::StreamStopped)?;

        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, MMAP_BUFFER_COUNT)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = self.pixel_format.to_grayscale(buf, self.width, self.height)?;
        Ok(Frame::new(gray, self.width, self.height, meta.sequence))
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(device = %self.path, "camera released");
        }
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    (0..16)
        .map(|i| format!("/dev/video{i}"))
        .filter(|path| Path::new(path).exists())
        .filter_map(|path| {
            let dev = Device::with_path(&path).ok()?;
            let caps = dev.query_caps().ok()?;
            caps.capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                .then(|| DeviceInfo {
                    path,
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                    bus: caps.bus.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_parse() {
        assert_eq!("user".parse::<Facing>().unwrap(), Facing::User);
        assert_eq!("Environment".parse::<Facing>().unwrap(), Facing::Environment);
        assert_eq!("rear".parse::<Facing>().unwrap(), Facing::Environment);
        assert!("sideways".parse::<Facing>().is_err());
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_missing_device_is_not_found() {
        let mut device = V4l2Device::new("/dev/video-facecheck-missing", 0);
        let err = device.request_stream(&StreamConstraints::default()).err();
        assert!(matches!(err, Some(CameraError::DeviceNotFound(_))), "{err:?}");
    }
}
