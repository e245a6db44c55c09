//! Face-chip thumbnails written next to the catalog.

use std::fs;
use std::path::PathBuf;

use image::imageops::FilterType;
use image::RgbImage;

use crate::db::BoundingBox;
use crate::error::{CatalogError, Result};

pub struct ThumbnailWriter {
    dir: PathBuf,
    size: u32,
}

impl ThumbnailWriter {
    pub fn new(dir: PathBuf, size: u32) -> Self {
        Self { dir, size }
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Path of the thumbnail for a given face.
    pub fn thumbnail_path(&self, face_id: i64) -> PathBuf {
        self.dir.join(format!("face_{face_id}.jpg"))
    }

    /// Crop the face region (padded and squared) out of the photo raster and
    /// save it as `face_{id}.jpg`, `size x size` pixels.
    pub fn write(&self, face_id: i64, photo: &RgbImage, bbox: &BoundingBox) -> Result<PathBuf> {
        self.ensure_dir()?;
        let (x, y, w, h) = crop_rect(bbox, photo.width(), photo.height());
        let chip = image::imageops::crop_imm(photo, x, y, w, h).to_image();
        let thumb = image::imageops::resize(&chip, self.size, self.size, FilterType::Triangle);
        let path = self.thumbnail_path(face_id);
        image::DynamicImage::ImageRgb8(thumb)
            .save(&path)
            .map_err(|e| CatalogError::Io(format!("failed to save {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Expand the bounding box by 20% on each side, grow it to a square along
/// its shorter axis, then clip to the image bounds.
fn crop_rect(bbox: &BoundingBox, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
    let pad_x = (bbox.width as f32 * 0.2).round() as i32;
    let pad_y = (bbox.height as f32 * 0.2).round() as i32;

    let mut x = bbox.x - pad_x;
    let mut y = bbox.y - pad_y;
    let mut w = bbox.width + 2 * pad_x;
    let mut h = bbox.height + 2 * pad_y;

    if w < h {
        x -= (h - w) / 2;
        w = h;
    } else if h < w {
        y -= (w - h) / 2;
        h = w;
    }

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(img_width as i32);
    let y1 = (y + h).min(img_height as i32);
    (
        x0 as u32,
        y0 as u32,
        (x1 - x0).max(1) as u32,
        (y1 - y0).max(1) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_crop_rect_is_square_inside_bounds() {
        let bbox = BoundingBox {
            x: 40,
            y: 40,
            width: 20,
            height: 10,
        };
        let (_, _, w, h) = crop_rect(&bbox, 200, 200);
        assert_eq!(w, h);
        assert!(w >= 20, "crop should cover the padded bbox");
    }

    #[test]
    fn test_crop_rect_clips_at_edges() {
        let bbox = BoundingBox {
            x: 0,
            y: 0,
            width: 30,
            height: 30,
        };
        let (x, y, w, h) = crop_rect(&bbox, 32, 32);
        assert_eq!((x, y), (0, 0));
        assert!(w <= 32 && h <= 32);
    }

    #[test]
    fn test_write_produces_square_jpeg() {
        let dir = tempdir().unwrap();
        let writer = ThumbnailWriter::new(dir.path().join("thumbs"), 150);
        let photo = RgbImage::from_pixel(120, 90, image::Rgb([80, 120, 160]));
        let bbox = BoundingBox {
            x: 30,
            y: 20,
            width: 40,
            height: 40,
        };
        let path = writer.write(7, &photo, &bbox).unwrap();
        assert!(path.ends_with("face_7.jpg"));
        let saved = image::open(&path).unwrap();
        assert_eq!(saved.width(), 150);
        assert_eq!(saved.height(), 150);
    }
}
