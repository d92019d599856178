//! One-to-one verification: reference image vs live snapshot.

use crate::engine::{EmbeddingEngine, EngineError};
use crate::input::{ImageError, ImageInput};
use crate::types::{
    EuclideanMatcher, FaceDescriptor, IndeterminateReason, Matcher, VerificationResult,
};
use thiserror::Error;

/// Internal failure of a single extraction. Never leaves the verifier.
#[derive(Error, Debug)]
enum ExtractError {
    #[error("{side} image: {source}")]
    Image {
        side: &'static str,
        #[source]
        source: ImageError,
    },
    #[error("{side} image: {source}")]
    Engine {
        side: &'static str,
        #[source]
        source: EngineError,
    },
}

/// Drives the embedding engine over both inputs and applies the match decision.
pub struct Verifier<E, M = EuclideanMatcher> {
    engine: E,
    matcher: M,
}

impl<E: EmbeddingEngine> Verifier<E, EuclideanMatcher> {
    pub fn new(engine: E, threshold: f32) -> Self {
        Self::with_matcher(engine, EuclideanMatcher::new(threshold))
    }
}

impl<E: EmbeddingEngine, M: Matcher> Verifier<E, M> {
    pub fn with_matcher(engine: E, matcher: M) -> Self {
        Self { engine, matcher }
    }

    /// Compare the reference face against the snapshot face.
    ///
    /// Missing inputs short-circuit before the engine is touched. Every
    /// failure after that becomes an `Indeterminate` result.
    pub fn verify(
        &mut self,
        reference: Option<&ImageInput>,
        snapshot: Option<&ImageInput>,
    ) -> VerificationResult {
        let (Some(reference), Some(snapshot)) = (reference, snapshot) else {
            tracing::debug!("verify requested without both inputs");
            return VerificationResult::indeterminate(IndeterminateReason::MissingInput);
        };

        let extracted = self
            .extract("reference", reference)
            .and_then(|r| Ok((r, self.extract("snapshot", snapshot)?)));

        let result = match extracted {
            Ok((Some(reference), Some(probe))) => self.compare(&reference, &probe),
            Ok((reference, probe)) => {
                tracing::info!(
                    reference_face = reference.is_some(),
                    snapshot_face = probe.is_some(),
                    "no face detected"
                );
                VerificationResult::indeterminate(IndeterminateReason::NoFaceDetected)
            }
            Err(e) => {
                tracing::warn!(error = %e, "verification failed");
                VerificationResult::indeterminate(IndeterminateReason::VerificationError)
            }
        };

        tracing::info!(?result, "verification complete");
        result
    }

    fn extract(
        &mut self,
        side: &'static str,
        input: &ImageInput,
    ) -> Result<Option<FaceDescriptor>, ExtractError> {
        let image = input.decode().map_err(|source| ExtractError::Image { side, source })?;
        self.engine
            .detect_primary_face(&image)
            .map_err(|source| ExtractError::Engine { side, source })
    }

    fn compare(&self, reference: &FaceDescriptor, probe: &FaceDescriptor) -> VerificationResult {
        let (expected, actual) = (reference.embedding.dim(), probe.embedding.dim());
        if expected != actual {
            let e = EngineError::DimensionMismatch { expected, actual };
            tracing::warn!(error = %e, "engine contract violated");
            return VerificationResult::indeterminate(IndeterminateReason::VerificationError);
        }
        self.matcher.decide(&reference.embedding, &probe.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::{GrayImage, Luma};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fake engine keyed on the value of the top-left pixel.
    #[derive(Default)]
    struct FakeEngine {
        faces: HashMap<u8, Vec<f32>>,
        failing: Option<u8>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeEngine {
        fn with_face(mut self, key: u8, values: Vec<f32>) -> Self {
            self.faces.insert(key, values);
            self
        }
    }

    impl EmbeddingEngine for FakeEngine {
        fn detect_primary_face(
            &mut self,
            image: &GrayImage,
        ) -> Result<Option<FaceDescriptor>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = image.get_pixel(0, 0).0[0];
            if self.failing == Some(key) {
                return Err(EngineError::DimensionMismatch { expected: 0, actual: 0 });
            }
            Ok(self.faces.get(&key).map(|values| FaceDescriptor {
                face: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 0.99,
                    landmarks: None,
                },
                landmarks: [(0.0, 0.0); 5],
                embedding: Embedding::new(values.clone()),
            }))
        }
    }

    fn image_keyed(key: u8) -> ImageInput {
        ImageInput::Decoded(Arc::new(GrayImage::from_pixel(4, 4, Luma([key]))))
    }

    #[test]
    fn test_missing_reference_skips_engine() {
        let engine = FakeEngine::default();
        let calls = Arc::clone(&engine.calls);
        let mut verifier = Verifier::new(engine, 0.6);

        let result = verifier.verify(None, Some(&image_keyed(1)));

        assert_eq!(result, VerificationResult::indeterminate(IndeterminateReason::MissingInput));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_face_matches_with_full_confidence() {
        let engine = FakeEngine::default().with_face(1, vec![0.6, 0.8]);
        let mut verifier = Verifier::new(engine, 0.6);

        let result = verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(1)));

        assert_eq!(result, VerificationResult::Match { confidence: 100.0, distance: 0.0 });
    }

    #[test]
    fn test_distant_faces_do_not_match() {
        let engine = FakeEngine::default()
            .with_face(1, vec![1.0, 0.0])
            .with_face(2, vec![0.0, 1.0]);
        let mut verifier = Verifier::new(engine, 0.6);

        let result = verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(2)));

        assert!(matches!(result, VerificationResult::NoMatch { .. }), "{result:?}");
    }

    #[test]
    fn test_close_faces_match_with_partial_confidence() {
        let engine = FakeEngine::default()
            .with_face(1, vec![0.0, 0.0])
            .with_face(2, vec![0.3, 0.0]);
        let mut verifier = Verifier::new(engine, 0.6);

        match verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(2))) {
            VerificationResult::Match { confidence, .. } => {
                assert!((confidence - 50.0).abs() < 1e-3, "confidence = {confidence}")
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_no_face_on_either_side_is_indeterminate() {
        let engine = FakeEngine::default().with_face(1, vec![1.0, 0.0]);
        let mut verifier = Verifier::new(engine, 0.6);
        let no_face = VerificationResult::indeterminate(IndeterminateReason::NoFaceDetected);

        assert_eq!(verifier.verify(Some(&image_keyed(9)), Some(&image_keyed(1))), no_face);
        assert_eq!(verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(9))), no_face);
    }

    #[test]
    fn test_engine_failure_is_indeterminate() {
        let engine = FakeEngine { failing: Some(3), ..FakeEngine::default() }
            .with_face(1, vec![1.0, 0.0]);
        let mut verifier = Verifier::new(engine, 0.6);

        let result = verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(3)));

        assert_eq!(
            result,
            VerificationResult::indeterminate(IndeterminateReason::VerificationError)
        );
    }

    #[test]
    fn test_undecodable_input_is_indeterminate() {
        let engine = FakeEngine::default().with_face(1, vec![1.0, 0.0]);
        let calls = Arc::clone(&engine.calls);
        let mut verifier = Verifier::new(engine, 0.6);
        let garbage = ImageInput::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]);

        let result = verifier.verify(Some(&garbage), Some(&image_keyed(1)));

        assert_eq!(
            result,
            VerificationResult::indeterminate(IndeterminateReason::VerificationError)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dimension_mismatch_is_indeterminate() {
        let engine = FakeEngine::default()
            .with_face(1, vec![1.0, 0.0])
            .with_face(2, vec![1.0, 0.0, 0.0]);
        let mut verifier = Verifier::new(engine, 0.6);

        let result = verifier.verify(Some(&image_keyed(1)), Some(&image_keyed(2)));

        assert_eq!(
            result,
            VerificationResult::indeterminate(IndeterminateReason::VerificationError)
        );
    }
}
