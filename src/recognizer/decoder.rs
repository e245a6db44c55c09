//! Image decoding via the `image` crate.

use std::path::Path;

use super::{Image, ImageDecoder};
use crate::error::{CatalogError, Result};

/// Default decoder: whatever formats the `image` crate understands.
pub struct StdImageDecoder;

impl ImageDecoder for StdImageDecoder {
    fn decode(&self, path: &Path) -> Result<Image> {
        let img = image::open(path)
            .map_err(|e| CatalogError::Io(format!("failed to decode {}: {e}", path.display())))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Image {
            width,
            height,
            data: rgb.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let mut img = image::RgbImage::new(4, 2);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.save(&path).unwrap();

        let decoded = StdImageDecoder.decode(&path).unwrap();
        assert_eq!(decoded.width, 4);
        assert_eq!(decoded.height, 2);
        assert!(decoded.is_valid());
        assert_eq!(&decoded.data[0..3], &[255, 0, 0]);
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_image.jpg");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(StdImageDecoder.decode(&path).is_err());
    }
}
