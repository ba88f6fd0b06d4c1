//! The engine thread: owns the camera device path, the ONNX pipeline and
//! the gallery store, and serves enrollment/recognition/verification
//! requests from the D-Bus handlers over an mpsc channel.
//!
//! The camera itself is opened per request and released before the reply
//! is sent; no capture handle ever spans two calls.

use crate::config::Config;
use crate::store::{AttendanceStatus, GalleryStore, StoreError, UserSummary};
use image::codecs::jpeg::JpegEncoder;
use image::GrayImage;
use rollcall_core::aggregate::{self, AggregateError};
use rollcall_core::enroll;
use rollcall_core::matcher::{self, MatchCandidate, VerifyError};
use rollcall_core::recognize::{self, RecognizeError};
use rollcall_core::{CaptureTracker, Frame, Gallery, GalleryError, SourceError};
use rollcall_face::{FacePipeline, PipelineError};
use rollcall_hw::{render_credential, Camera, CameraError, DisplayClient};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// JPEG quality for the stored profile photo.
const PROFILE_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("recognition error: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of one enrollment.
#[derive(Debug, Serialize)]
pub struct EnrollReport {
    pub identity: String,
    pub samples_captured: usize,
    pub samples_kept: usize,
    pub outliers_discarded: usize,
    pub attempts: usize,
}

/// Candidate data safe to hand to clients (no raw vectors).
#[derive(Debug, Serialize)]
pub struct CandidateSummary {
    pub identity: String,
    pub full_name: String,
    pub similarity: f32,
    pub distance: f32,
}

impl From<&MatchCandidate> for CandidateSummary {
    fn from(c: &MatchCandidate) -> Self {
        Self {
            identity: c.entry.identity.clone(),
            full_name: c.entry.full_name.clone(),
            similarity: c.similarity,
            distance: c.distance,
        }
    }
}

/// Result of one live recognition pass, device handshake included.
#[derive(Debug, Serialize)]
pub struct RecognizeReport {
    /// "confirmed", "rejected_on_device" or "exhausted".
    pub outcome: String,
    pub matched: bool,
    pub identified: Option<CandidateSummary>,
    pub candidates: Vec<CandidateSummary>,
    pub total_compared: usize,
    pub similarity: f32,
    pub frames_read: usize,
    pub faces_seen: usize,
    pub elapsed_ms: u64,
    pub attendance: Option<AttendanceStatus>,
}

/// Result of a 1:1 verification.
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub identity: String,
    pub verified: bool,
    pub similarity: f32,
    pub full_name: Option<String>,
    /// True when no face was ever embedded within the deadline.
    pub no_face: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub camera_device: String,
    pub db_path: String,
    pub device_address: String,
    pub users: u64,
}

enum EngineRequest {
    Enroll {
        identity: String,
        full_name: String,
        shift: String,
        reply: oneshot::Sender<Result<EnrollReport, EngineError>>,
    },
    Recognize {
        event: String,
        shift_filter: Option<String>,
        reply: oneshot::Sender<Result<RecognizeReport, EngineError>>,
    },
    Verify {
        identity: String,
        reply: oneshot::Sender<Result<VerifyReport, EngineError>>,
    },
    ListUsers {
        reply: oneshot::Sender<Result<Vec<UserSummary>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<StatusReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn enroll(
        &self,
        identity: String,
        full_name: String,
        shift: String,
    ) -> Result<EnrollReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                identity,
                full_name,
                shift,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn recognize(
        &self,
        event: String,
        shift_filter: Option<String>,
    ) -> Result<RecognizeReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                event,
                shift_filter,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn verify(&self, identity: String) -> Result<VerifyReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                identity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ListUsers { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the store and loads both ONNX models synchronously, failing fast
/// if any resource is missing. The camera is deliberately NOT opened here;
/// each request acquires and releases its own handle.
pub fn spawn_engine(cfg: Config) -> Result<(EngineHandle, Arc<CaptureTracker>), EngineError> {
    let store = GalleryStore::open(&cfg.db_path)?;
    let pipeline = FacePipeline::load(&cfg.detect_model_path(), &cfg.embed_model_path())?;
    tracing::info!(model_dir = %cfg.model_dir.display(), "face pipeline loaded");

    let tracker = Arc::new(CaptureTracker::new());
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let mut engine = Engine {
        cfg,
        store,
        pipeline,
        tracker: Arc::clone(&tracker),
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok((EngineHandle { tx }, tracker))
}

struct Engine {
    cfg: Config,
    store: GalleryStore,
    pipeline: FacePipeline,
    tracker: Arc<CaptureTracker>,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Enroll {
                identity,
                full_name,
                shift,
                reply,
            } => {
                let result = self.run_enroll(&identity, &full_name, &shift);
                let _ = reply.send(result);
            }
            EngineRequest::Recognize {
                event,
                shift_filter,
                reply,
            } => {
                let result = self.run_recognize(&event, shift_filter);
                let _ = reply.send(result);
            }
            EngineRequest::Verify { identity, reply } => {
                let result = self.run_verify(&identity);
                let _ = reply.send(result);
            }
            EngineRequest::ListUsers { reply } => {
                let result = self.store.list_users().map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::Status { reply } => {
                let result = self.build_status();
                let _ = reply.send(result);
            }
        }
    }

    /// Capture, aggregate and persist one enrollment.
    fn run_enroll(
        &mut self,
        identity: &str,
        full_name: &str,
        shift: &str,
    ) -> Result<EnrollReport, EngineError> {
        tracing::info!(identity, full_name, shift, "enrollment started");

        let camera = Camera::open(&self.cfg.camera_device)?;
        let mut source = camera.stream()?;

        let batch = enroll::capture_samples(
            &mut source,
            &mut self.pipeline,
            &self.tracker,
            &self.cfg.enroll_config(),
        );
        drop(source);

        let outcome = aggregate::robust_reference(&batch.samples, &self.cfg.aggregate_config())?;

        self.store.upsert_user(identity, full_name, shift)?;
        let photo = batch.profile.as_ref().and_then(|frame| {
            frame_to_jpeg(frame)
                .map_err(|e| {
                    tracing::warn!(error = %e, "profile photo encoding failed, storing none");
                })
                .ok()
        });
        self.store
            .write_reference(identity, &outcome.reference, photo.as_deref())?;

        tracing::info!(
            identity,
            captured = batch.samples.len(),
            kept = outcome.kept,
            discarded = outcome.discarded,
            "enrollment complete"
        );

        Ok(EnrollReport {
            identity: identity.to_string(),
            samples_captured: batch.samples.len(),
            samples_kept: outcome.kept,
            outliers_discarded: outcome.discarded,
            attempts: batch.attempts,
        })
    }

    /// One live recognition pass, including the device handshake and the
    /// attendance write on acceptance.
    fn run_recognize(
        &mut self,
        event: &str,
        shift_filter: Option<String>,
    ) -> Result<RecognizeReport, EngineError> {
        tracing::info!(event, ?shift_filter, "recognition started");

        // Snapshot once per pass, not per frame.
        let snapshot = self.store.list_active(shift_filter.as_deref())?;
        let recog_cfg = self.cfg.recognition_config(shift_filter);

        let camera = Camera::open(&self.cfg.camera_device)?;
        let report = recognize::run_once(
            || {
                camera
                    .stream()
                    .map_err(|e| SourceError::Unavailable(e.to_string()))
            },
            &mut self.pipeline,
            &snapshot,
            &recog_cfg,
        )?;

        let mut outcome = "exhausted".to_string();
        let mut matched = false;
        let mut identified = None;
        let mut attendance = None;

        if report.confirmed() {
            if let Some(top) = report.best.as_ref().and_then(|r| r.best.as_ref()) {
                matched = true;
                identified = Some(CandidateSummary::from(top));

                if self.request_device_confirmation(&top.entry.identity) {
                    let status = self.store.append_attendance(
                        &top.entry.identity,
                        event,
                        "biometric",
                        Some(top.similarity),
                    )?;
                    attendance = Some(status);
                    outcome = "confirmed".to_string();
                } else {
                    tracing::info!(identity = %top.entry.identity, "confirmation rejected at device");
                    outcome = "rejected_on_device".to_string();
                }
            }
        }

        let (candidates, total_compared, similarity) = match &report.best {
            Some(r) => (
                r.candidates.iter().map(CandidateSummary::from).collect(),
                r.total_compared,
                r.similarity,
            ),
            None => (Vec::new(), 0, 0.0),
        };

        Ok(RecognizeReport {
            outcome,
            matched,
            identified,
            candidates,
            total_compared,
            similarity,
            frames_read: report.frames_read,
            faces_seen: report.faces_seen,
            elapsed_ms: report.elapsed.as_millis() as u64,
            attendance,
        })
    }

    /// Render the stored credential and ask the display device. Every
    /// failure along the way counts as a rejection.
    fn request_device_confirmation(&self, identity: &str) -> bool {
        let photo = match self.store.photo(identity) {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                tracing::warn!(identity, "no stored photo, cannot show credential");
                return false;
            }
            Err(e) => {
                tracing::warn!(identity, error = %e, "photo lookup failed");
                return false;
            }
        };

        let credential = match render_credential(&photo) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(identity, error = %e, "credential rendering failed");
                return false;
            }
        };

        let client = DisplayClient::new(
            self.cfg.device_address.clone(),
            self.cfg.device_timeout(),
        );
        client.confirm(&credential).accepted()
    }

    /// Capture a probe within the recognition budget, then check it 1:1
    /// against one enrolled identity. Skips the device handshake entirely.
    fn run_verify(&mut self, identity: &str) -> Result<VerifyReport, EngineError> {
        tracing::info!(identity, "verification started");

        let snapshot = self.store.list_active(None)?;
        let recog_cfg = self.cfg.recognition_config(None);

        let camera = Camera::open(&self.cfg.camera_device)?;
        let report = recognize::run_once(
            || {
                camera
                    .stream()
                    .map_err(|e| SourceError::Unavailable(e.to_string()))
            },
            &mut self.pipeline,
            &snapshot,
            &recog_cfg,
        )?;

        let Some(probe) = report.probe else {
            tracing::info!(identity, "no face captured within deadline");
            return Ok(VerifyReport {
                identity: identity.to_string(),
                verified: false,
                similarity: 0.0,
                full_name: None,
                no_face: true,
            });
        };

        let verification = matcher::verify(
            &probe,
            &self.store,
            identity,
            self.cfg.verification_threshold,
        )?;

        Ok(VerifyReport {
            identity: identity.to_string(),
            verified: verification.verified,
            similarity: verification.similarity,
            full_name: Some(verification.full_name),
            no_face: false,
        })
    }

    fn build_status(&self) -> Result<StatusReport, EngineError> {
        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            camera_device: self.cfg.camera_device.clone(),
            db_path: self.cfg.db_path.to_string_lossy().into_owned(),
            device_address: self.cfg.device_address.clone(),
            users: self.store.user_count()?,
        })
    }
}

/// Encode a grayscale frame as the stored profile JPEG.
fn frame_to_jpeg(frame: &Frame) -> Result<Vec<u8>, String> {
    let img = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| "frame buffer does not match its dimensions".to_string())?;

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, PROFILE_JPEG_QUALITY);
    img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
    Ok(out)
}
