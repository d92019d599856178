//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by non-maximum suppression.
//! Input frames are letterboxed into a square canvas so aspect ratio survives.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    scaled_width: u32,
    scaled_height: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - scaled_width) / 2,
            pad_y: (target - scaled_height) / 2,
            scaled_width,
            scaled_height,
        }
    }

    /// Map a point in model-input space back to the source frame.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// (score, bbox, kps) output tensor indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = map_stride_outputs(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self { session, stride_outputs })
    }

    /// Detect faces, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
        let input = to_input_tensor(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} at stride {stride}: {e}"))
                    })
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "landmarks")?;

            candidates.extend(decode_stride(
                StrideTensors { scores, bboxes, kps },
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        // nms keeps descending confidence order
        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox the frame onto a mean-valued canvas and normalize into NCHW.
fn to_input_tensor(image: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE as usize;
    // Padding normalizes to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    let resized = imageops::resize(
        image,
        letterbox.scaled_width,
        letterbox.scaled_height,
        FilterType::Triangle,
    );

    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = value;
        }
    }

    tensor
}

/// Work out which output tensor holds what. Exports either name them
/// `score_8`, `bbox_16`, `kps_32`, ... or use opaque numeric names, in which
/// case the standard order is scores 0-2, boxes 3-5, landmarks 6-8.
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut mapping = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (position("score", stride), position("bbox", stride), position("kps", stride)) {
            (Some(s), Some(b), Some(k)) => mapping[slot] = (s, b, k),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized, using positional order");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    mapping
}

struct StrideTensors<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode candidate faces for a single stride level into source-frame coordinates.
fn decode_stride(
    tensors: StrideTensors<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_width = SCRFD_INPUT_SIZE as usize / stride;
    let grid_height = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid_width * grid_height * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut faces = Vec::new();
    for anchor in 0..anchors {
        let score = tensors.scores.get(anchor).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = anchor / SCRFD_ANCHORS_PER_CELL;
        let center_x = (cell % grid_width) as f32 * step;
        let center_y = (cell / grid_width) as f32 * step;

        let Some(offsets) = tensors.bboxes.get(anchor * 4..anchor * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.to_source(center_x - offsets[0] * step, center_y - offsets[1] * step);
        let (x2, y2) = letterbox.to_source(center_x + offsets[2] * step, center_y + offsets[3] * step);

        let landmarks = tensors.kps.get(anchor * 10..anchor * 10 + 10).map(|points| {
            std::array::from_fn(|i| {
                letterbox.to_source(
                    center_x + points[i * 2] * step,
                    center_y + points[i * 2 + 1] * step,
                )
            })
        });

        faces.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    faces
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let intersection = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn face(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: size, height: size, confidence, landmarks: None }
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = face(0.0, 0.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &face(500.0, 500.0, 10.0, 1.0)), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_drops_overlapping_and_sorts() {
        let kept = nms(
            vec![
                face(200.0, 200.0, 50.0, 0.7),
                face(5.0, 5.0, 100.0, 0.8),
                face(0.0, 0.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_wide_frame_pads_vertically() {
        let lb = Letterbox::fit(1280, 720, SCRFD_INPUT_SIZE);
        assert_eq!(lb.scaled_width, 640);
        assert_eq!(lb.scaled_height, 360);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);

        let (x, y) = lb.to_source(320.0, 140.0 + 180.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_input_tensor_padding_is_neutral() {
        let image = GrayImage::from_pixel(64, 32, Luma([255]));
        let lb = Letterbox::fit(64, 32, SCRFD_INPUT_SIZE);
        let tensor = to_input_tensor(&image, &lb);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // top padding row stays at zero, content is bright
        assert_eq!(tensor[[0, 0, 0, 320]], 0.0);
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_map_stride_outputs_named_and_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(map_stride_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_map_stride_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        assert_eq!(map_stride_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let stride = 32;
        let cells = (640 / stride) * (640 / stride) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let mut bboxes = vec![0.0f32; cells * 4];
        let mut kps = vec![0.0f32; cells * 10];

        // anchor 2 -> cell 1 -> center (32, 0)
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        kps[20] = 0.25;

        let lb = Letterbox::fit(640, 640, SCRFD_INPUT_SIZE);
        let faces = decode_stride(
            StrideTensors { scores: &scores, bboxes: &bboxes, kps: &kps },
            stride,
            &lb,
            0.5,
        );

        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert!((f.x - 16.0).abs() < 1e-4);
        assert!((f.width - 32.0).abs() < 1e-4);
        assert!((f.height - 32.0).abs() < 1e-4);
        let landmarks = f.landmarks.expect("landmarks decoded");
        assert!((landmarks[0].0 - 40.0).abs() < 1e-4);
    }
}
