//! Anchor-free face detector via ONNX Runtime.
//!
//! Consumes an RFB-320 style model: a 320x240 RGB input, a scores tensor
//! of shape [1, N, 2] (background/face) and a boxes tensor of shape
//! [1, N, 4] holding normalized corner coordinates. Decoding is plain
//! thresholding plus IoU suppression; no anchor arithmetic.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::Region;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_WIDTH: usize = 320;
const DET_INPUT_HEIGHT: usize = 240;
const DET_MEAN: f32 = 127.0;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer is not {expected} bytes (got {actual})")]
    BadFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face before embedding extraction.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub region: Region,
    pub confidence: f32,
}

pub struct FaceDetector {
    session: Session,
}

impl std::fmt::Debug for FaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceDetector").finish_non_exhaustive()
    }
}

impl FaceDetector {
    /// Load the detection ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectError> {
        if !Path::new(model_path).exists() {
            return Err(DetectError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame, highest confidence first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectError> {
        let input = preprocess(frame, width, height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceFailed(format!("boxes: {e}")))?;

        Ok(decode(scores, boxes, width as f32, height as f32))
    }
}

/// Resize the grayscale frame to the network input and replicate the single
/// channel into RGB, normalized symmetrically around the mean.
fn preprocess(frame: &[u8], width: u32, height: u32) -> Result<Array4<f32>, DetectError> {
    let expected = (width * height) as usize;
    if frame.len() < expected {
        return Err(DetectError::BadFrame {
            expected,
            actual: frame.len(),
        });
    }

    let img = GrayImage::from_raw(width, height, frame[..expected].to_vec())
        .ok_or(DetectError::BadFrame { expected, actual: frame.len() })?;
    let resized = imageops::resize(
        &img,
        DET_INPUT_WIDTH as u32,
        DET_INPUT_HEIGHT as u32,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_HEIGHT, DET_INPUT_WIDTH));
    for y in 0..DET_INPUT_HEIGHT {
        for x in 0..DET_INPUT_WIDTH {
            let normalized = (resized.get_pixel(x as u32, y as u32)[0] as f32 - DET_MEAN) / DET_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    Ok(tensor)
}

/// Decode flat score/box tensors into pixel-space face boxes.
///
/// `scores` is [N * 2] (background, face); `boxes` is [N * 4] normalized
/// (x1, y1, x2, y2). Boxes below the confidence floor are dropped, the rest
/// pass through IoU suppression.
fn decode(scores: &[f32], boxes: &[f32], frame_w: f32, frame_h: f32) -> Vec<FaceBox> {
    let count = scores.len() / 2;
    let mut detections: Vec<FaceBox> = Vec::new();

    for i in 0..count {
        let confidence = scores[i * 2 + 1];
        if confidence < DET_CONFIDENCE_THRESHOLD {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * frame_w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * frame_h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * frame_w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * frame_h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(FaceBox {
            region: Region {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            },
            confidence,
        });
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    nms(detections, DET_NMS_IOU)
}

/// Greedy IoU suppression over confidence-sorted detections.
fn nms(sorted: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in sorted {
        if kept
            .iter()
            .all(|k| iou(&k.region, &candidate.region) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &Region, b: &Region) -> f32 {
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = (a.x + a.width).min(b.x + b.width);
    let iy2 = (a.y + a.height).min(b.y + b.height);

    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_channels() {
        let frame = vec![127u8; 64 * 48];
        let tensor = preprocess(&frame, 64, 48).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, DET_INPUT_HEIGHT, DET_INPUT_WIDTH]);
        // Pixel value equal to the mean normalizes to zero on every channel.
        assert!(tensor[[0, 0, 10, 10]].abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 10, 10]], tensor[[0, 1, 10, 10]]);
        assert_eq!(tensor[[0, 1, 10, 10]], tensor[[0, 2, 10, 10]]);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let frame = vec![0u8; 10];
        assert!(matches!(
            preprocess(&frame, 64, 48),
            Err(DetectError::BadFrame { .. })
        ));
    }

    #[test]
    fn test_decode_thresholds_and_scales() {
        // Two candidates: one confident face, one background-dominated.
        let scores = vec![0.1, 0.9, 0.8, 0.2];
        let boxes = vec![
            0.25, 0.25, 0.75, 0.75, // kept
            0.0, 0.0, 0.5, 0.5, // dropped by score
        ];
        let faces = decode(&scores, &boxes, 640.0, 480.0);
        assert_eq!(faces.len(), 1);
        let r = faces[0].region;
        assert_eq!(r.x, 160.0);
        assert_eq!(r.y, 120.0);
        assert_eq!(r.width, 320.0);
        assert_eq!(r.height, 240.0);
    }

    #[test]
    fn test_decode_drops_degenerate_boxes() {
        let scores = vec![0.0, 0.99];
        let boxes = vec![0.5, 0.5, 0.5, 0.5];
        assert!(decode(&scores, &boxes, 640.0, 480.0).is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let make = |x: f32, conf: f32| FaceBox {
            region: Region { x, y: 0.0, width: 100.0, height: 100.0 },
            confidence: conf,
        };
        // Two heavily overlapping boxes and one far away.
        let sorted = vec![make(0.0, 0.9), make(10.0, 0.8), make(500.0, 0.7)];
        let kept = nms(sorted, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = Region { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let b = Region { x: 100.0, y: 100.0, width: 10.0, height: 10.0 };
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = Region { x: 5.0, y: 5.0, width: 20.0, height: 20.0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load("/nonexistent/det.onnx").unwrap_err();
        assert!(matches!(err, DetectError::ModelNotFound(_)));
    }
}
