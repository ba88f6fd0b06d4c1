//! Shared enrollment progress, observable by unrelated polling callers.
//!
//! One tracker lives for the whole process. Only one enrollment session is
//! assumed live at a time; a second session's `reset` silently overwrites
//! the first's progress. Callers serialize enrollment at a higher layer.

use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Idle,
    Capturing,
    Completed,
    Error,
}

/// Read-only snapshot of an enrollment capture session.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureProgress {
    pub active: bool,
    pub current: u32,
    pub total: u32,
    pub status: ProgressStatus,
}

impl CaptureProgress {
    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        self.current * 100 / self.total
    }
}

/// Mutex-guarded progress record. Every read-modify-write holds the lock
/// for the whole sequence.
pub struct CaptureTracker {
    inner: Mutex<CaptureProgress>,
}

impl Default for CaptureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CaptureProgress {
                active: false,
                current: 0,
                total: 0,
                status: ProgressStatus::Idle,
            }),
        }
    }

    /// Begin a new capture session of `total` expected samples.
    pub fn reset(&self, total: u32) {
        let mut p = self.inner.lock().expect("progress lock poisoned");
        p.active = true;
        p.current = 0;
        p.total = total;
        p.status = ProgressStatus::Capturing;
    }

    /// Record one captured sample. Saturates at `total`.
    pub fn increment(&self) {
        let mut p = self.inner.lock().expect("progress lock poisoned");
        if p.current < p.total {
            p.current += 1;
        }
    }

    /// Move to a terminal or intermediate status. Terminal states clear the
    /// active flag.
    pub fn set_status(&self, status: ProgressStatus) {
        let mut p = self.inner.lock().expect("progress lock poisoned");
        p.status = status;
        if matches!(status, ProgressStatus::Completed | ProgressStatus::Error) {
            p.active = false;
        }
    }

    pub fn snapshot(&self) -> CaptureProgress {
        self.inner.lock().expect("progress lock poisoned").clone()
    }
}
