use facecheck_core::{is_valid_threshold, DEFAULT_MATCH_THRESHOLD};
use facecheck_hw::{Facing, StreamConstraints};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance below which two faces match.
    pub match_threshold: f32,
    /// Preferred capture size. The driver may pick something else.
    pub preferred_width: u32,
    pub preferred_height: u32,
    pub facing: Facing,
    /// Frames to discard after acquiring the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACECHECK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facecheck_core::default_model_dir());

        let facing = std::env::var("FACECHECK_FACING")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(facing) => Some(facing),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring FACECHECK_FACING");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            camera_device: std::env::var("FACECHECK_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            match_threshold: match_threshold(std::env::var("FACECHECK_MATCH_THRESHOLD").ok()),
            preferred_width: env_parse("FACECHECK_PREFERRED_WIDTH", 640),
            preferred_height: env_parse("FACECHECK_PREFERRED_HEIGHT", 480),
            facing,
            warmup_frames: env_parse("FACECHECK_WARMUP_FRAMES", 4),
        }
    }

    pub fn stream_constraints(&self) -> StreamConstraints {
        StreamConstraints {
            facing: self.facing,
            preferred_width: self.preferred_width,
            preferred_height: self.preferred_height,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse the match threshold, falling back to the default for anything that
/// is not a finite positive number.
fn match_threshold(raw: Option<String>) -> f32 {
    let Some(raw) = raw else {
        return DEFAULT_MATCH_THRESHOLD;
    };
    match raw.trim().parse::<f32>() {
        Ok(threshold) if is_valid_threshold(threshold) => threshold,
        _ => {
            tracing::warn!(value = %raw, "invalid FACECHECK_MATCH_THRESHOLD, using default");
            DEFAULT_MATCH_THRESHOLD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_threshold_default() {
        assert_eq!(match_threshold(None), DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_match_threshold_override() {
        assert_eq!(match_threshold(Some("0.45".into())), 0.45);
    }

    #[test]
    fn test_match_threshold_rejects_unusable_values() {
        for raw in ["NaN", "inf", "0", "-0.6", "abc", ""] {
            assert_eq!(match_threshold(Some(raw.into())), DEFAULT_MATCH_THRESHOLD, "{raw}");
        }
    }
}
