//! Video source seam.
//!
//! A frame source is a continuously pollable producer: one frame per pull,
//! blocking, transient failures allowed. The camera crate provides the real
//! implementation; tests use scripted fakes.

use crate::types::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    /// The source could not be opened at all. Fatal for the invocation.
    #[error("video source unavailable: {0}")]
    Unavailable(String),
    /// A single pull failed. Expected under load; callers retry within
    /// their own budget.
    #[error("frame read failed: {0}")]
    Read(String),
}

pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, SourceError>;
}
