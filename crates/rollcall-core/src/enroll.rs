//! Enrollment capture: collect embeddings for the aggregator.
//!
//! Pulls frames from an already-open source until the target sample count
//! is reached or the raw-pull budget runs out, reporting progress through
//! the shared tracker as it goes. The last frame that produced an
//! embedding is kept as the profile photo candidate.

use crate::engine::{best_detection, quality_score, EmbeddingEngine};
use crate::progress::{CaptureTracker, ProgressStatus};
use crate::source::FrameSource;
use crate::types::{Embedding, Frame};

#[derive(Debug, Clone)]
pub struct EnrollConfig {
    /// How many valid embeddings to aim for.
    pub target_samples: usize,
    /// Fewest samples for the capture to be considered usable; below this
    /// the tracker ends in `Error` and aggregation will refuse the batch.
    pub min_samples: usize,
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            target_samples: 40,
            min_samples: 5,
        }
    }
}

impl EnrollConfig {
    /// Raw frame pulls allowed before giving up on reaching the target.
    pub fn max_attempts(&self) -> usize {
        self.target_samples * 3
    }
}

/// Everything one capture session produced.
#[derive(Debug)]
pub struct CaptureBatch {
    pub samples: Vec<Embedding>,
    /// Last frame whose embedding passed detection; the profile photo.
    /// `None` only when not a single face was ever embedded.
    pub profile: Option<Frame>,
    pub attempts: usize,
}

/// Run one capture session over an open source.
///
/// Per-frame failures (bad pull, no face, engine fault) are absorbed and
/// retried within the attempt budget. The tracker is reset at entry and
/// left in `Capturing` progress, then `Completed` when at least
/// `min_samples` arrived, `Error` otherwise.
pub fn capture_samples<S, E>(
    source: &mut S,
    engine: &mut E,
    tracker: &CaptureTracker,
    cfg: &EnrollConfig,
) -> CaptureBatch
where
    S: FrameSource,
    E: EmbeddingEngine + ?Sized,
{
    tracker.reset(cfg.target_samples as u32);

    let mut samples = Vec::with_capacity(cfg.target_samples);
    let mut profile: Option<Frame> = None;
    let mut attempts = 0usize;

    while samples.len() < cfg.target_samples && attempts < cfg.max_attempts() {
        attempts += 1;

        let frame = match source.read_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::trace!(error = %e, attempt = attempts, "frame pull failed");
                continue;
            }
        };

        let detections = match engine.detect_and_embed(&frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, attempt = attempts, "engine fault on capture frame");
                continue;
            }
        };
        let Some(detection) = best_detection(detections) else {
            tracing::trace!(attempt = attempts, "no face in capture frame");
            continue;
        };

        let quality = quality_score(&detection.region, frame.width, frame.height);
        tracing::debug!(
            captured = samples.len() + 1,
            target = cfg.target_samples,
            quality,
            "capture sample accepted"
        );

        samples.push(detection.embedding);
        profile = Some(frame);
        tracker.increment();
    }

    if samples.len() >= cfg.min_samples {
        tracker.set_status(ProgressStatus::Completed);
    } else {
        tracker.set_status(ProgressStatus::Error);
    }

    tracing::info!(
        samples = samples.len(),
        attempts,
        target = cfg.target_samples,
        "capture session finished"
    );

    CaptureBatch {
        samples,
        profile,
        attempts,
    }
}
