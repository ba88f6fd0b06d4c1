//! D-Bus interface for the attendance daemon.
//!
//! Bus name: org.rollcall.Attendance1
//! Object path: /org/rollcall/Attendance1
//!
//! Reports are returned as JSON strings so clients stay decoupled from
//! the engine's Rust types.

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::CaptureTracker;
use std::sync::Arc;
use zbus::interface;

pub struct AttendanceService {
    engine: EngineHandle,
    tracker: Arc<CaptureTracker>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, tracker: Arc<CaptureTracker>) -> Self {
        Self { engine, tracker }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match &err {
        EngineError::Camera(_) | EngineError::Recognize(_) => {
            zbus::fdo::Error::Failed(format!("video source unavailable: {err}"))
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Enroll (or re-enroll) a person: capture samples, aggregate, store.
    async fn enroll(
        &self,
        identity: &str,
        full_name: &str,
        shift: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity, full_name, shift, "enroll requested");
        let report = self
            .engine
            .enroll(identity.into(), full_name.into(), shift.into())
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Run one live recognition pass for an event. An empty shift string
    /// means no shift filtering.
    async fn recognize(&self, event: &str, shift: &str) -> zbus::fdo::Result<String> {
        tracing::info!(event, shift, "recognize requested");
        let shift_filter = if shift.is_empty() {
            None
        } else {
            Some(shift.to_string())
        };
        let report = self
            .engine
            .recognize(event.into(), shift_filter)
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// 1:1 verification of the person at the camera against one identity.
    async fn verify(&self, identity: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "verify requested");
        let report = self.engine.verify(identity.into()).await.map_err(to_fdo)?;
        to_json(&report)
    }

    /// Current enrollment capture progress. Served directly from the
    /// shared tracker; never blocks on the engine thread.
    async fn progress(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.tracker.snapshot();
        to_json(&serde_json::json!({
            "active": snapshot.active,
            "current": snapshot.current,
            "total": snapshot.total,
            "status": snapshot.status,
            "percentage": snapshot.percentage(),
        }))
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(to_fdo)?;
        to_json(&report)
    }

    /// Enrolled users, for diagnostics.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self.engine.list_users().await.map_err(to_fdo)?;
        to_json(&users)
    }
}
