//! rollcall-face — face detection and embedding extraction.
//!
//! An anchor-free detector and a 512-d embedding network, both running via
//! ONNX Runtime on CPU, wired together behind the core engine trait.

pub mod detect;
pub mod embed;
pub mod pipeline;

pub use detect::{DetectError, FaceDetector};
pub use embed::{EmbedError, FaceEmbedder};
pub use pipeline::{FacePipeline, PipelineError};

use std::path::PathBuf;

/// System-wide default location for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
