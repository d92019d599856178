//! facecheck-core — face embedding and one-to-one verification.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition, both
//! running via ONNX Runtime, and decides whether a reference image and a
//! live snapshot show the same person.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod input;
pub mod recognizer;
pub mod types;
pub mod verifier;

pub use engine::{EmbeddingEngine, EngineError, OnnxEmbeddingEngine};
pub use input::{ImageError, ImageInput, TaggedInput};
pub use types::{
    is_valid_threshold, BoundingBox, Embedding, EuclideanMatcher, FaceDescriptor,
    IndeterminateReason, Matcher, VerificationResult, DEFAULT_MATCH_THRESHOLD,
};
pub use verifier::Verifier;

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back
/// to `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
