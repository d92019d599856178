//! Exclusive ownership of the live camera: acquire, stream, release.

use crate::camera::{CameraError, CaptureDevice, StreamConstraints, VideoStream};
use crate::frame::Frame;
use serde::Serialize;

/// Lifecycle of the capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Requesting,
    Streaming,
    Stopped,
    Error(String),
}

/// Where a live preview would be rendered. The daemon has none; a GUI would.
pub trait PreviewSink: Send {
    fn attach(&mut self, width: u32, height: u32);
    fn detach(&mut self);
}

/// An acquired stream. Dropping the session stops the stream.
pub struct CaptureSession {
    stream: Box<dyn VideoStream>,
}

impl CaptureSession {
    fn new(stream: Box<dyn VideoStream>) -> Self {
        Self { stream }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.stream.dimensions()
    }

    pub fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        self.stream.grab_frame()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

/// Owns at most one [`CaptureSession`] at a time.
pub struct CaptureDeviceController<D> {
    device: D,
    constraints: StreamConstraints,
    state: CaptureState,
    session: Option<CaptureSession>,
    sink: Option<Box<dyn PreviewSink>>,
}

impl<D: CaptureDevice> CaptureDeviceController<D> {
    pub fn new(device: D, constraints: StreamConstraints) -> Self {
        Self {
            device,
            constraints,
            state: CaptureState::Idle,
            session: None,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Acquire the camera, releasing any current session first.
    ///
    /// Returns the negotiated frame size. On failure the controller moves to
    /// `Error` and can be started again.
    pub fn start(&mut self) -> Result<(u32, u32), CameraError> {
        self.release();
        self.state = CaptureState::Requesting;

        match self.device.request_stream(&self.constraints) {
            Ok(stream) => {
                let session = CaptureSession::new(stream);
                let (width, height) = session.dimensions();
                if let Some(sink) = self.sink.as_mut() {
                    sink.attach(width, height);
                }
                self.session = Some(session);
                self.state = CaptureState::Streaming;
                tracing::info!(width, height, "capture streaming");
                Ok((width, height))
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera access failed");
                self.state = CaptureState::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Release the camera if held. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.release() {
            self.state = CaptureState::Stopped;
        } else if matches!(self.state, CaptureState::Error(_)) {
            self.state = CaptureState::Idle;
        }
    }

    /// The live session, only while streaming.
    pub fn session_mut(&mut self) -> Option<&mut CaptureSession> {
        match self.state {
            CaptureState::Streaming => self.session.as_mut(),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == CaptureState::Streaming && self.session.is_some()
    }

    fn release(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.detach();
        }
        drop(session);
        tracing::debug!("capture session released");
        true
    }
}

impl<D> Drop for CaptureDeviceController<D> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(sink) = self.sink.as_mut() {
                sink.detach();
            }
            drop(session);
            tracing::debug!("capture session released on teardown");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counts live streams so leaks are observable.
    #[derive(Default, Clone)]
    pub(crate) struct FakeDevice {
        pub active: Arc<AtomicUsize>,
        pub requests: Arc<AtomicUsize>,
        pub deny: Arc<AtomicBool>,
        pub size: (u32, u32),
    }

    impl FakeDevice {
        pub fn sized(width: u32, height: u32) -> Self {
            Self { size: (width, height), ..Self::default() }
        }
    }

    pub(crate) struct FakeStream {
        active: Arc<AtomicUsize>,
        running: bool,
        size: (u32, u32),
        sequence: u32,
    }

    impl VideoStream for FakeStream {
        fn dimensions(&self) -> (u32, u32) {
            self.size
        }

        fn grab_frame(&mut self) -> Result<Frame, CameraError> {
            if !self.running {
                return Err(CameraError::StreamStopped);
            }
            self.sequence += 1;
            let (w, h) = self.size;
            Ok(Frame::new(vec![128u8; (w * h) as usize], w, h, self.sequence))
        }

        fn stop(&mut self) {
            if std::mem::replace(&mut self.running, false) {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl CaptureDevice for FakeDevice {
        fn request_stream(
            &mut self,
            constraints: &StreamConstraints,
        ) -> Result<Box<dyn VideoStream>, CameraError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                return Err(CameraError::AccessDenied("permission denied".into()));
            }
            assert_eq!(
                self.active.load(Ordering::SeqCst),
                0,
                "previous stream must be released before a new request"
            );
            self.active.fetch_add(1, Ordering::SeqCst);
            let size = if self.size == (0, 0) {
                (constraints.preferred_width, constraints.preferred_height)
            } else {
                self.size
            };
            Ok(Box::new(FakeStream {
                active: Arc::clone(&self.active),
                running: true,
                size,
                sequence: 0,
            }))
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl PreviewSink for RecordingSink {
        fn attach(&mut self, width: u32, height: u32) {
            self.0.lock().unwrap().push(format!("attach {width}x{height}"));
        }

        fn detach(&mut self) {
            self.0.lock().unwrap().push("detach".into());
        }
    }

    #[test]
    fn test_start_streams_with_negotiated_size() {
        let device = FakeDevice::sized(1280, 720);
        let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());
        assert_eq!(controller.state(), &CaptureState::Idle);

        assert_eq!(controller.start().unwrap(), (1280, 720));
        assert_eq!(controller.state(), &CaptureState::Streaming);
        assert!(controller.is_streaming());
    }

    #[test]
    fn test_double_start_keeps_one_session() {
        let device = FakeDevice::default();
        let (active, requests) = (Arc::clone(&device.active), Arc::clone(&device.requests));
        let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());

        controller.start().unwrap();
        controller.start().unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let device = FakeDevice::default();
        let active = Arc::clone(&device.active);
        let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());

        controller.stop();
        assert_eq!(controller.state(), &CaptureState::Idle);

        controller.start().unwrap();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), &CaptureState::Stopped);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(controller.session_mut().is_none());
    }

    #[test]
    fn test_denied_access_moves_to_error_and_can_retry() {
        let device = FakeDevice::default();
        let deny = Arc::clone(&device.deny);
        deny.store(true, Ordering::SeqCst);
        let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());

        let err = controller.start().unwrap_err();
        assert!(matches!(err, CameraError::AccessDenied(_)));
        assert!(matches!(controller.state(), CaptureState::Error(_)));

        deny.store(false, Ordering::SeqCst);
        controller.start().unwrap();
        assert_eq!(controller.state(), &CaptureState::Streaming);
    }

    #[test]
    fn test_failed_restart_releases_previous_session() {
        let device = FakeDevice::default();
        let (active, deny) = (Arc::clone(&device.active), Arc::clone(&device.deny));
        let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());

        controller.start().unwrap();
        deny.store(true, Ordering::SeqCst);
        assert!(controller.start().is_err());

        assert_eq!(active.load(Ordering::SeqCst), 0);
        controller.stop();
        assert_eq!(controller.state(), &CaptureState::Idle);
    }

    #[test]
    fn test_drop_releases_device() {
        let device = FakeDevice::default();
        let active = Arc::clone(&device.active);
        {
            let mut controller = CaptureDeviceController::new(device, StreamConstraints::default());
            controller.start().unwrap();
            assert_eq!(active.load(Ordering::SeqCst), 1);
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sink_follows_session() {
        let sink = RecordingSink::default();
        let log = Arc::clone(&sink.0);
        let mut controller =
            CaptureDeviceController::new(FakeDevice::sized(320, 240), StreamConstraints::default())
                .with_sink(Box::new(sink));

        controller.start().unwrap();
        controller.start().unwrap();
        controller.stop();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["attach 320x240", "detach", "attach 320x240", "detach"]
        );
    }
}
