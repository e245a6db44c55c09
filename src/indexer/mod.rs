//! Indexing stage: turn discovered paths into persisted photos and faces.

pub mod thumbnails;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;
use sha2::{Digest, Sha256};

use crate::db::{timestamp_now, BoundingBox, Database, Face, Photo};
use crate::error::{CatalogError, Result};
use crate::recognizer::{FaceRecognizer, Image, ImageDecoder};

pub use thumbnails::ThumbnailWriter;

/// Invoked after each path: (current, total, path, faces found so far).
pub type IndexProgress<'a> = dyn FnMut(usize, usize, &Path, usize) + 'a;

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub faces_found: usize,
}

pub struct Indexer<'a> {
    db: &'a Database,
    recognizer: &'a dyn FaceRecognizer,
    decoder: &'a dyn ImageDecoder,
    thumbnails: ThumbnailWriter,
    batch_size: usize,
    scan_id: Option<i64>,
    cancel: Arc<AtomicBool>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        db: &'a Database,
        recognizer: &'a dyn FaceRecognizer,
        decoder: &'a dyn ImageDecoder,
        thumbnails: ThumbnailWriter,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            recognizer,
            decoder,
            thumbnails,
            batch_size: batch_size.max(1),
            scan_id: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tie progress counters to a scan session row, updated at each commit.
    pub fn with_scan_session(mut self, scan_id: i64) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Share a cancellation flag owned by the caller.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Index every path in order. Per-file failures are logged and skipped;
    /// progress is committed in batches so a crash loses at most one batch.
    pub fn index(
        &self,
        paths: &[PathBuf],
        mut progress: Option<&mut IndexProgress>,
    ) -> Result<IndexOutcome> {
        let total = paths.len();
        let mut outcome = IndexOutcome::default();

        self.db.begin_transaction()?;
        for (i, path) in paths.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                self.db.rollback()?;
                return Err(CatalogError::Cancelled);
            }

            match self.index_one(path) {
                Ok(Some(faces)) => {
                    outcome.processed += 1;
                    outcome.faces_found += faces;
                }
                Ok(None) => outcome.skipped += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to index file");
                    outcome.failed += 1;
                }
            }

            let done = i + 1;
            if done % self.batch_size == 0 && done < total {
                self.checkpoint(total, done, outcome.faces_found)?;
                self.db.begin_transaction()?;
            }
            if let Some(cb) = progress.as_mut() {
                cb(done, total, path, outcome.faces_found);
            }
        }
        self.checkpoint(total, total, outcome.faces_found)?;

        Ok(outcome)
    }

    /// Record scan progress and commit the open batch.
    fn checkpoint(&self, total: usize, done: usize, faces: usize) -> Result<()> {
        if let Some(scan_id) = self.scan_id {
            self.db
                .update_scan_progress(scan_id, total as i64, done as i64, faces as i64)?;
        }
        self.db.commit()
    }

    /// Returns `Ok(None)` when the path is already catalogued,
    /// `Ok(Some(n))` with the number of faces otherwise.
    fn index_one(&self, path: &Path) -> Result<Option<usize>> {
        let path_str = path.to_string_lossy().to_string();
        if self.db.get_photo_by_path(&path_str)?.is_some() {
            tracing::debug!(path = %path.display(), "already indexed, skipping");
            return Ok(None);
        }

        let image = self.decoder.decode(path)?;
        let file_size = std::fs::metadata(path)?.len() as i64;

        let photo = Photo {
            id: 0,
            file_path: path_str,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            folder_path: path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            width: image.width as i32,
            height: image.height as i32,
            file_size,
            exif_date: read_exif_date(path),
            scan_date: timestamp_now(),
            checksum: file_sha256(path).ok(),
        };
        let photo_id = self.db.insert_photo(&photo)?;

        let detections = self.recognizer.detect(&image)?;
        if detections.is_empty() {
            return Ok(Some(0));
        }

        let raster = RgbImage::from_raw(image.width, image.height, image.data.clone())
            .ok_or_else(|| CatalogError::Corrupt("decoded raster size mismatch".to_string()))?;

        let mut count = 0usize;
        for detection in &detections {
            let bbox = clamp_bbox(detection.bbox, &image);
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }
            let face_id = self.db.insert_face(&Face {
                id: 0,
                photo_id,
                bbox,
                embedding: detection.embedding.clone(),
                cluster_id: None,
                person_id: None,
                confidence: detection.confidence.clamp(0.0, 1.0),
            })?;
            count += 1;

            // Thumbnail failures are logged but never abort indexing.
            if let Err(e) = self.thumbnails.write(face_id, &raster, &bbox) {
                tracing::warn!(face_id, error = %e, "failed to write face thumbnail");
            }
        }
        Ok(Some(count))
    }
}

fn clamp_bbox(bbox: BoundingBox, image: &Image) -> BoundingBox {
    let x = bbox.x.clamp(0, image.width as i32);
    let y = bbox.y.clamp(0, image.height as i32);
    BoundingBox {
        x,
        y,
        width: bbox.width.min(image.width as i32 - x),
        height: bbox.height.min(image.height as i32 - y),
    }
}

/// EXIF capture date, when the file carries one.
fn read_exif_date(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .or_else(|| exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY))?;
    Some(
        field
            .display_value()
            .to_string()
            .trim_matches('"')
            .to_string(),
    )
}

/// SHA-256 of the file contents, streamed.
fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
