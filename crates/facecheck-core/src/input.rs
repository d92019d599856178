//! Verification inputs: uploaded bytes, files on disk, or already-decoded frames.

use chrono::{DateTime, Utc};
use image::GrayImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero area")]
    Empty,
}

/// An image handed to the verifier, in whatever form it arrived.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Encoded container bytes (PNG, JPEG, ...), e.g. an upload or a snapshot.
    Encoded(Arc<[u8]>),
    /// A file that still has to be read from storage.
    File(PathBuf),
    /// Pixels ready for the embedding engine.
    Decoded(Arc<GrayImage>),
}

impl ImageInput {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Encoded(bytes.into())
    }

    /// Decode into 8-bit luma. `Decoded` inputs are returned as-is.
    pub fn decode(&self) -> Result<Arc<GrayImage>, ImageError> {
        let gray = match self {
            Self::Decoded(gray) => return Ok(Arc::clone(gray)),
            Self::Encoded(bytes) => image::load_from_memory(bytes)?.to_luma8(),
            Self::File(path) => {
                let bytes = std::fs::read(path).map_err(|source| ImageError::Io {
                    path: path.clone(),
                    source,
                })?;
                image::load_from_memory(&bytes)?.to_luma8()
            }
        };

        if gray.width() == 0 || gray.height() == 0 {
            return Err(ImageError::Empty);
        }
        Ok(Arc::new(gray))
    }
}

/// An input with an identity, so results can be tied to the exact pair that produced them.
#[derive(Debug, Clone)]
pub struct TaggedInput {
    pub id: Uuid,
    pub input: ImageInput,
    pub received_at: DateTime<Utc>,
}

impl TaggedInput {
    pub fn new(input: ImageInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            received_at: Utc::now(),
        }
    }
}
