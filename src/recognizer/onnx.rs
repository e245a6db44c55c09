//! ONNX-backed face recognizer: UltraFace for detection, SFace for
//! 128-dimensional embeddings. Both run on CPU via ONNX Runtime.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::{FaceDetection, FaceRecognizer, Image};
use crate::db::BoundingBox;
use crate::embedding::EMBEDDING_DIM;
use crate::error::{CatalogError, Result};

const DETECTION_INPUT_WIDTH: u32 = 320;
const DETECTION_INPUT_HEIGHT: u32 = 240;
const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.7;
const NMS_IOU_THRESHOLD: f32 = 0.3;

const EMBED_INPUT_SIZE: u32 = 112;

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const EMBED_MODEL_FILE: &str = "sface-2021dec.onnx";
const EMBED_MODEL_URL: &str = "https://github.com/opencv/opencv_zoo/raw/main/models/face_recognition_sface/face_recognition_sface_2021dec.onnx";

fn ort_err<R>(e: ort::Error<R>) -> CatalogError {
    CatalogError::Io(format!("onnx runtime: {e}"))
}

pub struct OnnxFaceRecognizer {
    detector: Mutex<Session>,
    embedder: Mutex<Session>,
}

impl OnnxFaceRecognizer {
    /// Load both models from `model_dir`, downloading them on first use.
    pub fn load(model_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(model_dir)?;
        let detector_path = ensure_model(model_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
        let embedder_path = ensure_model(model_dir, EMBED_MODEL_FILE, EMBED_MODEL_URL)?;
        Ok(Self {
            detector: Mutex::new(build_session(&detector_path)?),
            embedder: Mutex::new(build_session(&embedder_path)?),
        })
    }
}

impl FaceRecognizer for OnnxFaceRecognizer {
    fn detect(&self, image: &Image) -> Result<Vec<FaceDetection>> {
        if !image.is_valid() {
            return Err(CatalogError::InvalidInput(
                "detect called with an invalid raster".to_string(),
            ));
        }
        let raster = RgbImage::from_raw(image.width, image.height, image.data.clone())
            .ok_or_else(|| CatalogError::InvalidInput("raster size mismatch".to_string()))?;
        let img = DynamicImage::ImageRgb8(raster);

        let boxes = {
            let mut session = self
                .detector
                .lock()
                .map_err(|_| CatalogError::InvalidState("detector lock poisoned".to_string()))?;
            run_detection(&mut session, &img)?
        };
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = self
            .embedder
            .lock()
            .map_err(|_| CatalogError::InvalidState("embedder lock poisoned".to_string()))?;

        let mut detections = Vec::with_capacity(boxes.len());
        for (bbox, confidence) in boxes {
            let bbox = clamp_bbox(bbox, image.width, image.height);
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }
            let chip = crop_face(&img, &bbox, image.width, image.height);
            let embedding = run_embedding(&mut session, &chip)?;
            detections.push(FaceDetection {
                bbox,
                confidence: confidence.clamp(0.0, 1.0),
                embedding,
                landmarks: Vec::new(),
            });
        }
        Ok(detections)
    }
}

fn build_session(path: &Path) -> Result<Session> {
    Session::builder()
        .map_err(ort_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_err)?
        .with_intra_threads(4)
        .map_err(ort_err)?
        .commit_from_file(path)
        .map_err(ort_err)
}

/// Download a model file if it is not already present.
fn ensure_model(model_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    let model_path = model_dir.join(filename);
    if !model_path.exists() {
        tracing::info!(model = %filename, "downloading model");
        let response = ureq::get(url)
            .call()
            .map_err(|e| CatalogError::Io(format!("failed to download {filename}: {e}")))?;
        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)
            .map_err(|e| CatalogError::Io(format!("failed to write {filename}: {e}")))?;
        tracing::info!(model = %filename, path = ?model_path, "model downloaded");
    }
    Ok(model_path)
}

fn run_detection(session: &mut Session, img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>> {
    let orig_width = img.width();
    let orig_height = img.height();

    let resized = img.resize_exact(
        DETECTION_INPUT_WIDTH,
        DETECTION_INPUT_HEIGHT,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    // NCHW, UltraFace normalization (x - 127) / 128
    let w = DETECTION_INPUT_WIDTH as usize;
    let h = DETECTION_INPUT_HEIGHT as usize;
    let mut input_data = vec![0.0f32; 3 * h * w];
    for y in 0..h {
        for x in 0..w {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * w + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[h * w + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * h * w + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor =
        Tensor::from_array(([1usize, 3, h, w], input_data.into_boxed_slice())).map_err(ort_err)?;
    let outputs = session
        .run(ort::inputs!["input" => input_tensor])
        .map_err(ort_err)?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| CatalogError::Io("detector returned no scores output".to_string()))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| CatalogError::Io("detector returned no boxes output".to_string()))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>().map_err(ort_err)?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>().map_err(ort_err)?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();
    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= DETECTION_CONFIDENCE_THRESHOLD {
            continue;
        }
        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;
        face_boxes.push((
            BoundingBox {
                x: x1.max(0),
                y: y1.max(0),
                width: (x2 - x1).max(1),
                height: (y2 - y1).max(1),
            },
            confidence,
        ));
    }

    Ok(nms(face_boxes, NMS_IOU_THRESHOLD))
}

fn run_embedding(session: &mut Session, chip: &DynamicImage) -> Result<Vec<f32>> {
    let resized = chip.resize_exact(
        EMBED_INPUT_SIZE,
        EMBED_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    let side = EMBED_INPUT_SIZE as usize;
    let mut input_data = vec![0.0f32; 3 * side * side];
    for y in 0..side {
        for x in 0..side {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * side + x;
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[side * side + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * side * side + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array(([1usize, 3, side, side], input_data.into_boxed_slice()))
        .map_err(ort_err)?;
    let outputs = session
        .run(ort::inputs!["data" => input_tensor])
        .map_err(ort_err)?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| CatalogError::Io("embedder returned no output".to_string()))?;
    let (_shape, embedding_data) = embedding_output
        .1
        .try_extract_tensor::<f32>()
        .map_err(ort_err)?;

    let embedding: Vec<f32> = embedding_data.to_vec();
    if embedding.len() != EMBEDDING_DIM {
        return Err(CatalogError::Io(format!(
            "embedding model produced {} dimensions, expected {}",
            embedding.len(),
            EMBEDDING_DIM
        )));
    }

    // L2-normalize so distances are comparable across images
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        Ok(embedding.iter().map(|x| x / norm).collect())
    } else {
        Ok(embedding)
    }
}

fn clamp_bbox(bbox: BoundingBox, width: u32, height: u32) -> BoundingBox {
    let x = bbox.x.clamp(0, width as i32);
    let y = bbox.y.clamp(0, height as i32);
    BoundingBox {
        x,
        y,
        width: bbox.width.min(width as i32 - x),
        height: bbox.height.min(height as i32 - y),
    }
}

/// Crop the face region with 20% padding for the embedding model.
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = (bbox.x - padding_x).max(0) as u32;
    let y = (bbox.y - padding_y).max(0) as u32;
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Non-maximum suppression over candidate boxes.
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_full_overlap() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 1, y: 1, width: 10, height: 10 };
        let c = BoundingBox { x: 50, y: 50, width: 10, height: 10 };
        let kept = nms(vec![(a, 0.9), (b, 0.8), (c, 0.7)], 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, a);
        assert_eq!(kept[1].0, c);
    }

    #[test]
    fn test_clamp_bbox_at_edges() {
        let bbox = BoundingBox { x: -5, y: 90, width: 20, height: 20 };
        let clamped = clamp_bbox(bbox, 100, 100);
        assert_eq!(clamped.x, 0);
        assert_eq!(clamped.y, 90);
        assert!(clamped.bottom() <= 100);
        assert!(clamped.right() <= 100);
    }
}
