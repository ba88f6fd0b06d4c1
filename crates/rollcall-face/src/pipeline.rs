//! Detection and embedding wired together behind the core engine trait.

use crate::detect::{DetectError, FaceDetector};
use crate::embed::{EmbedError, FaceEmbedder};
use rollcall_core::{Detection, EmbeddingEngine, EngineError, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detect(#[from] DetectError),
    #[error("embedder: {0}")]
    Embed(#[from] EmbedError),
}

/// The full frame-to-embeddings pipeline. One instance per process,
/// injected into the loops by reference.
pub struct FacePipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl FacePipeline {
    /// Load both models, failing fast if either file is missing.
    pub fn load(detect_model: &str, embed_model: &str) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detect_model)?;
        let embedder = FaceEmbedder::load(embed_model)?;
        Ok(Self { detector, embedder })
    }
}

impl EmbeddingEngine for FacePipeline {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        let faces = self
            .detector
            .detect(&frame.data, frame.width, frame.height)
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            match self
                .embedder
                .extract(&frame.data, frame.width, frame.height, &face.region)
            {
                Ok(embedding) => detections.push(Detection {
                    embedding,
                    region: face.region,
                    confidence: face.confidence,
                }),
                // One unreadable face should not sink the other
                // detections in the frame.
                Err(e) => {
                    tracing::warn!(error = %e, "embedding extraction failed for one face");
                }
            }
        }

        Ok(detections)
    }
}
