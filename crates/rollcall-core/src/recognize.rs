//! The live recognition loop.
//!
//! One invocation opens one video source handle, samples frames under a
//! wall-clock deadline, and reports the first candidate that clears the
//! accept threshold. Per-frame failures (bad read, no face) are absorbed;
//! only failure to open the source aborts the invocation.

use crate::engine::{best_detection, EmbeddingEngine};
use crate::gallery::GalleryEntry;
use crate::matcher::{find_match, MatchResult};
use crate::source::{FrameSource, SourceError};
use crate::types::Embedding;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    /// The video source could not be acquired. Surfaced to the caller as a
    /// service-unavailable condition; not retried here.
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
}

/// States of one recognition invocation. `Confirmed`, `Exhausted` and
/// `ConnectFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connecting,
    Sampling,
    Confirmed,
    Exhausted,
    ConnectFailed,
}

#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Similarity a candidate must reach for single-shot confirmation.
    pub accept_threshold: f32,
    /// Wall-clock budget for the sampling phase.
    pub deadline: Duration,
    /// Optional shift tag restricting the gallery.
    pub shift_filter: Option<String>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.48,
            deadline: Duration::from_millis(2000),
            shift_filter: None,
        }
    }
}

/// What one invocation saw. `best` is the highest-similarity matching pass
/// across all sampled frames, reported even on exhaustion so callers can
/// tell how close the nearest miss was; `probe` is the query embedding from
/// that same pass, available for downstream 1:1 verification.
#[derive(Debug)]
pub struct RecognitionReport {
    pub state: LoopState,
    pub best: Option<MatchResult>,
    pub probe: Option<Embedding>,
    pub frames_read: usize,
    pub faces_seen: usize,
    pub elapsed: Duration,
}

impl RecognitionReport {
    pub fn confirmed(&self) -> bool {
        self.state == LoopState::Confirmed
    }
}

/// Run one recognition pass.
///
/// `open` is called exactly once; the handle it yields lives only for this
/// invocation and is released on every exit path. The gallery snapshot is
/// taken by the caller once, not re-fetched per frame.
pub fn run_once<S, E, F>(
    open: F,
    engine: &mut E,
    snapshot: &[GalleryEntry],
    cfg: &RecognitionConfig,
) -> Result<RecognitionReport, RecognizeError>
where
    S: FrameSource,
    E: EmbeddingEngine + ?Sized,
    F: FnOnce() -> Result<S, SourceError>,
{
    let mut state = LoopState::Connecting;
    let mut source = match open() {
        Ok(s) => s,
        Err(e) => {
            state = LoopState::ConnectFailed;
            tracing::error!(error = %e, ?state, "could not acquire video source");
            return Err(RecognizeError::SourceUnavailable(e.to_string()));
        }
    };

    state = LoopState::Sampling;
    tracing::debug!(
        gallery = snapshot.len(),
        deadline_ms = cfg.deadline.as_millis() as u64,
        threshold = cfg.accept_threshold,
        "sampling started"
    );

    let started = Instant::now();
    let mut frames_read = 0usize;
    let mut faces_seen = 0usize;
    let mut best: Option<(MatchResult, Embedding)> = None;

    // Deadline enforced by polling elapsed time between iterations; a
    // stuck frame pull can overrun the nominal budget by one read.
    while started.elapsed() < cfg.deadline {
        let frame = match source.read_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::trace!(error = %e, "frame pull failed, retrying");
                continue;
            }
        };
        frames_read += 1;

        let detections = match engine.detect_and_embed(&frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "embedding engine failed on frame, skipping");
                continue;
            }
        };
        let Some(detection) = best_detection(detections) else {
            continue;
        };
        faces_seen += 1;

        let result = find_match(
            &detection.embedding,
            snapshot,
            cfg.accept_threshold,
            cfg.shift_filter.as_deref(),
        );

        let is_better = best
            .as_ref()
            .map_or(true, |(prev, _)| result.similarity > prev.similarity);
        let matched = result.matched;
        if is_better {
            best = Some((result, detection.embedding));
        }

        // Single-shot confirmation: the first frame whose best candidate
        // clears the threshold ends the session.
        if matched {
            state = LoopState::Confirmed;
            break;
        }
    }

    if state != LoopState::Confirmed {
        state = LoopState::Exhausted;
    }

    let elapsed = started.elapsed();
    let (best, probe) = match best {
        Some((r, p)) => (Some(r), Some(p)),
        None => (None, None),
    };

    tracing::info!(
        ?state,
        frames_read,
        faces_seen,
        elapsed_ms = elapsed.as_millis() as u64,
        best_similarity = best.as_ref().map(|r| r.similarity),
        "recognition pass finished"
    );

    Ok(RecognitionReport {
        state,
        best,
        probe,
        frames_read,
        faces_seen,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Detection, EngineError, Region};
    use crate::types::{Frame, EMBEDDING_DIM};

    fn emb(first: f32, second: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = first;
        v[1] = second;
        Embedding::new(v).unwrap()
    }

    fn entry(identity: &str, reference: Embedding) -> GalleryEntry {
        GalleryEntry {
            identity: identity.to_string(),
            full_name: identity.to_string(),
            shift: "day".to_string(),
            active: true,
            reference: Some(reference),
        }
    }

    fn frame() -> Frame {
        Frame { data: vec![128; 4], width: 2, height: 2, sequence: 0 }
    }

    /// Source that fails every read.
    struct DeadSource;

    impl FrameSource for DeadSource {
        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            Err(SourceError::Read("stream stalled".into()))
        }
    }

    /// Source that always yields a frame.
    struct LiveSource;

    impl FrameSource for LiveSource {
        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            Ok(frame())
        }
    }

    /// Engine that replays a script of per-frame outcomes, then repeats the
    /// last entry.
    struct ScriptedEngine {
        script: Vec<Option<Embedding>>,
        cursor: usize,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Option<Embedding>>) -> Self {
            Self { script, cursor: 0 }
        }
    }

    impl EmbeddingEngine for ScriptedEngine {
        fn detect_and_embed(&mut self, _frame: &Frame) -> Result<Vec<Detection>, EngineError> {
            let idx = self.cursor.min(self.script.len() - 1);
            self.cursor += 1;
            Ok(self.script[idx]
                .clone()
                .map(|embedding| {
                    vec![Detection {
                        embedding,
                        region: Region { x: 0.0, y: 0.0, width: 100.0, height: 100.0 },
                        confidence: 0.9,
                    }]
                })
                .unwrap_or_default())
        }
    }

    fn cfg(threshold: f32, deadline_ms: u64) -> RecognitionConfig {
        RecognitionConfig {
            accept_threshold: threshold,
            deadline: Duration::from_millis(deadline_ms),
            shift_filter: None,
        }
    }

    #[test]
    fn test_connect_failure_surfaces_source_unavailable() {
        let mut engine = ScriptedEngine::new(vec![None]);
        let result = run_once::<DeadSource, _, _>(
            || Err(SourceError::Unavailable("no route to camera".into())),
            &mut engine,
            &[],
            &cfg(0.48, 50),
        );
        assert!(matches!(result, Err(RecognizeError::SourceUnavailable(_))));
    }

    #[test]
    fn test_dead_source_exhausts_within_deadline() {
        let mut engine = ScriptedEngine::new(vec![None]);
        let deadline = Duration::from_millis(80);
        let started = Instant::now();
        let report = run_once(|| Ok(DeadSource), &mut engine, &[], &cfg(0.48, 80)).unwrap();
        let took = started.elapsed();

        assert_eq!(report.state, LoopState::Exhausted);
        assert_eq!(report.frames_read, 0);
        assert!(report.best.is_none());
        // Must terminate promptly: the deadline plus scheduling slack, not
        // hang indefinitely.
        assert!(took < deadline + Duration::from_millis(500), "took {took:?}");
    }

    #[test]
    fn test_first_qualifying_frame_confirms() {
        let reference = emb(1.0, 0.0);
        let snapshot = vec![entry("7-7", reference.clone())];
        // Two face-less frames, then a perfect match.
        let mut engine =
            ScriptedEngine::new(vec![None, None, Some(reference)]);

        let report = run_once(|| Ok(LiveSource), &mut engine, &snapshot, &cfg(0.48, 2000)).unwrap();
        assert_eq!(report.state, LoopState::Confirmed);
        assert!(report.confirmed());
        assert_eq!(report.frames_read, 3);
        assert_eq!(report.faces_seen, 1);
        let best = report.best.unwrap();
        assert!(best.matched);
        assert_eq!(best.best.unwrap().entry.identity, "7-7");
        assert!(report.probe.is_some());
    }

    #[test]
    fn test_below_threshold_exhausts_but_reports_best_seen() {
        let reference = emb(1.0, 0.0);
        let snapshot = vec![entry("8-8", reference)];
        // A face that only reaches ~0.707 similarity.
        let mut engine = ScriptedEngine::new(vec![Some(emb(1.0, 1.0))]);

        let report = run_once(|| Ok(LiveSource), &mut engine, &snapshot, &cfg(0.9, 60)).unwrap();
        assert_eq!(report.state, LoopState::Exhausted);
        let best = report.best.unwrap();
        assert!(!best.matched);
        assert!((best.similarity - 0.7071).abs() < 1e-3);
        assert!(report.faces_seen >= 1);
    }

    #[test]
    fn test_best_seen_tracks_highest_similarity() {
        let reference = emb(1.0, 0.0);
        let snapshot = vec![entry("9-9", reference)];
        // Similarity improves then degrades; none clear the threshold.
        let mut engine = ScriptedEngine::new(vec![
            Some(emb(1.0, 2.0)), // ~0.447
            Some(emb(1.0, 0.5)), // ~0.894
            Some(emb(1.0, 3.0)), // ~0.316
        ]);

        let report = run_once(|| Ok(LiveSource), &mut engine, &snapshot, &cfg(0.99, 60)).unwrap();
        let best = report.best.unwrap();
        assert!((best.similarity - 0.894).abs() < 1e-2);
    }
}
