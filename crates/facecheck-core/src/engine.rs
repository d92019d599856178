//! Face embedding capability: find the primary face in an image and describe it.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceDescriptor;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("embedding dimensionality changed: {expected} vs {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Anything that can turn an image into at most one face descriptor.
///
/// Implementations must be initialized (weights loaded) before they exist;
/// readiness is therefore a property of whoever owns the engine.
pub trait EmbeddingEngine: Send {
    /// Locate the single best face. `Ok(None)` means no face was found.
    fn detect_primary_face(
        &mut self,
        image: &GrayImage,
    ) -> Result<Option<FaceDescriptor>, EngineError>;
}

impl<E: EmbeddingEngine + ?Sized> EmbeddingEngine for Box<E> {
    fn detect_primary_face(
        &mut self,
        image: &GrayImage,
    ) -> Result<Option<FaceDescriptor>, EngineError> {
        (**self).detect_primary_face(image)
    }
}

/// SCRFD detection + ArcFace recognition on ONNX Runtime.
pub struct OnnxEmbeddingEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbeddingEngine {
    /// Load both models from `model_dir`.
    pub fn initialize(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        tracing::info!(dir = %model_dir.display(), "embedding engine ready");
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingEngine for OnnxEmbeddingEngine {
    fn detect_primary_face(
        &mut self,
        image: &GrayImage,
    ) -> Result<Option<FaceDescriptor>, EngineError> {
        let faces = self.detector.detect(image)?;
        if faces.len() > 1 {
            // Extra faces are ignored; the highest-confidence one is the subject.
            tracing::debug!(count = faces.len(), "multiple faces detected, using the best");
        }

        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };
        let Some(landmarks) = face.landmarks else {
            tracing::debug!(confidence = face.confidence, "best face has no landmarks");
            return Ok(None);
        };

        let embedding = self.recognizer.extract(image, &face)?;
        tracing::debug!(
            confidence = face.confidence,
            dim = embedding.dim(),
            "face descriptor extracted"
        );

        Ok(Some(FaceDescriptor { face, landmarks, embedding }))
    }
}
