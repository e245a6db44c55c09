//! Face detection and image decoding seams.
//!
//! The pipeline is written against the [`FaceRecognizer`] and [`ImageDecoder`]
//! traits; the ONNX-backed implementations live in [`onnx`] and [`decoder`],
//! and tests substitute deterministic stubs.

pub mod decoder;
pub mod onnx;

use std::path::Path;

use crate::db::BoundingBox;
use crate::error::Result;

pub use crate::embedding::distance as embedding_distance;
pub use decoder::StdImageDecoder;
pub use onnx::OnnxFaceRecognizer;

/// Decoded raster: row-major RGB8.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

/// One detected face within an image.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// 128-dimensional embedding.
    pub embedding: Vec<f32>,
    /// Facial landmark points, empty when the model provides none.
    pub landmarks: Vec<(i32, i32)>,
}

/// Detects faces and computes their embeddings.
pub trait FaceRecognizer {
    fn detect(&self, image: &Image) -> Result<Vec<FaceDetection>>;
}

/// Decodes an image file into an RGB raster.
pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> Result<Image>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_validity() {
        let img = Image {
            width: 2,
            height: 3,
            data: vec![0u8; 18],
        };
        assert!(img.is_valid());
        let bad = Image {
            width: 2,
            height: 3,
            data: vec![0u8; 17],
        };
        assert!(!bad.is_valid());
    }
}
