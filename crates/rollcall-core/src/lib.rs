//! rollcall-core — the biometric heart of the attendance system.
//!
//! Aggregates noisy per-frame embeddings into one robust reference vector,
//! ranks probe embeddings against the enrolled gallery, and runs the
//! deadline-bounded live recognition loop. All hardware and model access
//! goes through the [`FrameSource`] and [`EmbeddingEngine`] traits so the
//! loops are testable with fakes.

pub mod aggregate;
pub mod engine;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod progress;
pub mod recognize;
pub mod source;
pub mod types;

pub use engine::{Detection, EmbeddingEngine, EngineError, Region};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use matcher::{MatchCandidate, MatchResult, Verification};
pub use progress::{CaptureProgress, CaptureTracker, ProgressStatus};
pub use source::{FrameSource, SourceError};
pub use types::{Embedding, EmbeddingError, Frame, EMBEDDING_DIM};
