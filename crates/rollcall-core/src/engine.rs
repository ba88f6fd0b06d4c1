//! Embedding engine seam.
//!
//! The detection/embedding model is an external capability behind the
//! [`EmbeddingEngine`] trait; the loops in this crate only ever see
//! [`Detection`] values. Constructed once at process start and injected by
//! reference, never looked up through a global.

use crate::types::{Embedding, Frame};
use thiserror::Error;

/// Empirical face-area ratio that maps to quality 0.0.
const QUALITY_AREA_FLOOR: f32 = 0.02;
/// Empirical face-area ratio that maps to quality 1.0.
const QUALITY_AREA_CEIL: f32 = 0.32;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Pixel region of a detected face.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One detected face: its embedding, where it was, and how confident the
/// detector was.
#[derive(Debug, Clone)]
pub struct Detection {
    pub embedding: Embedding,
    pub region: Region,
    pub confidence: f32,
}

/// Detection plus 512-d embedding extraction for every face in a frame.
///
/// An empty result means no face was found, which is an expected per-frame
/// outcome, not an error. `Err` is reserved for inference faults.
pub trait EmbeddingEngine {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EngineError>;
}

/// Pick the detection to use when several faces are present: the one with
/// the largest pixel area.
pub fn best_detection(detections: Vec<Detection>) -> Option<Detection> {
    detections
        .into_iter()
        .max_by(|a, b| {
            a.region
                .area()
                .partial_cmp(&b.region.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Quality score for a detection, from the face-area / frame-area ratio
/// linearly rescaled from [0.02, 0.32] into [0, 1] and clamped.
pub fn quality_score(region: &Region, frame_width: u32, frame_height: u32) -> f32 {
    let frame_area = (frame_width as f32) * (frame_height as f32);
    if frame_area <= 0.0 {
        return 0.0;
    }
    let ratio = region.area() / frame_area;
    ((ratio - QUALITY_AREA_FLOOR) / (QUALITY_AREA_CEIL - QUALITY_AREA_FLOOR)).clamp(0.0, 1.0)
}
