use serde::{Deserialize, Serialize};

/// Maximum Euclidean embedding distance accepted as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// A threshold must be finite and positive; anything else turns every
/// comparison into a no-match.
pub fn is_valid_threshold(threshold: f32) -> bool {
    threshold.is_finite() && threshold > 0.0
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal dimensionality.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(self.dim(), other.dim(), "embedding dimensionality mismatch");
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// The single face an engine reports for one image: where it is and who it is.
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    pub face: BoundingBox,
    pub landmarks: [(f32, f32); 5],
    pub embedding: Embedding,
}

/// Why a verification could not produce a match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndeterminateReason {
    MissingInput,
    NoFaceDetected,
    VerificationError,
}

impl IndeterminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInput => "missing-input",
            Self::NoFaceDetected => "no-face-detected",
            Self::VerificationError => "verification-error",
        }
    }
}

impl std::fmt::Display for IndeterminateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a reference face against a live snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum VerificationResult {
    /// Same person. `confidence` is a percentage in (0, 100].
    Match { confidence: f32, distance: f32 },
    NoMatch { distance: f32 },
    Indeterminate { reason: IndeterminateReason },
}

impl VerificationResult {
    pub fn indeterminate(reason: IndeterminateReason) -> Self {
        Self::Indeterminate { reason }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }

    /// Human-readable status line for the presentation layer.
    pub fn status_message(&self) -> String {
        match self {
            Self::Match { confidence, .. } => {
                format!("Face verified: match ({confidence:.1}% confidence)")
            }
            Self::NoMatch { .. } => "Face verification failed: faces do not match".to_string(),
            Self::Indeterminate { reason } => match reason {
                IndeterminateReason::MissingInput => {
                    "Upload a reference image and capture a live photo first".to_string()
                }
                IndeterminateReason::NoFaceDetected => {
                    "No face detected in one or both images".to_string()
                }
                IndeterminateReason::VerificationError => {
                    "Verification failed due to an internal error".to_string()
                }
            },
        }
    }
}

/// Strategy for deciding whether two embeddings belong to the same face.
pub trait Matcher {
    fn decide(&self, reference: &Embedding, probe: &Embedding) -> VerificationResult;
}

/// Distance-threshold matcher: `distance < threshold` is a match.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self { threshold: DEFAULT_MATCH_THRESHOLD }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Map a raw distance onto a decision. The comparison is strict.
    pub fn classify(&self, distance: f32) -> VerificationResult {
        if distance < self.threshold {
            VerificationResult::Match {
                confidence: (1.0 - distance / self.threshold) * 100.0,
                distance,
            }
        } else {
            VerificationResult::NoMatch { distance }
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn decide(&self, reference: &Embedding, probe: &Embedding) -> VerificationResult {
        self.classify(reference.euclidean_distance(probe))
    }
}
