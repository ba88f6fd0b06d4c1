//! 512-d face embedding extraction via ONNX Runtime.
//!
//! Crops a padded square around the detected face, resizes to the 112x112
//! network input, and L2-normalizes the output vector so cosine similarity
//! downstream reduces to a dot product on unit vectors.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{Embedding, Region, EMBEDDING_DIM};
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
/// Square crop side relative to the longer box side, leaving context
/// around the face for the network.
const CROP_EXPANSION: f32 = 1.4;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer is not {expected} bytes (got {actual})")]
    BadFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmbedder {
    session: Session,
}

impl std::fmt::Debug for FaceEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceEmbedder").finish_non_exhaustive()
    }
}

impl FaceEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self { session })
    }

    /// Extract a normalized embedding for one detected face region.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: &Region,
    ) -> Result<Embedding, EmbedError> {
        let crop = crop_face(frame, width, height, region)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Embedding::new(values)
            .map_err(|e| EmbedError::InferenceFailed(e.to_string()))
    }
}

/// Cut a padded square around the face and scale it to the network input.
fn crop_face(
    frame: &[u8],
    width: u32,
    height: u32,
    region: &Region,
) -> Result<Vec<u8>, EmbedError> {
    let expected = (width * height) as usize;
    if frame.len() < expected {
        return Err(EmbedError::BadFrame {
            expected,
            actual: frame.len(),
        });
    }

    let img = GrayImage::from_raw(width, height, frame[..expected].to_vec())
        .ok_or(EmbedError::BadFrame { expected, actual: frame.len() })?;

    let side = (region.width.max(region.height) * CROP_EXPANSION)
        .min(width.min(height) as f32);
    let cx = region.x + region.width / 2.0;
    let cy = region.y + region.height / 2.0;

    let half = side / 2.0;
    let x0 = (cx - half).clamp(0.0, width as f32 - side) as u32;
    let y0 = (cy - half).clamp(0.0, height as f32 - side) as u32;
    let side = side as u32;

    let crop = imageops::crop_imm(&img, x0, y0, side, side).to_image();
    let resized = imageops::resize(
        &crop,
        EMBED_INPUT_SIZE as u32,
        EMBED_INPUT_SIZE as u32,
        FilterType::Triangle,
    );
    Ok(resized.into_raw())
}

/// Build the NCHW tensor, replicating grayscale into three channels.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}
