//! Read access to the enrolled gallery.
//!
//! The matcher only ever sees [`GalleryEntry`] values; the storage backend
//! resolves legacy field layouts before they get here, so an entry either
//! has a usable reference vector or `None`.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery backend error: {0}")]
    Backend(String),
}

/// One enrolled identity as the matcher sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    /// Unique external identity key (RUT-style string).
    pub identity: String,
    pub full_name: String,
    /// Shift tag, e.g. "day" or "evening".
    pub shift: String,
    pub active: bool,
    /// Aggregated reference vector. `None` means enrolled without
    /// biometrics; such entries are skipped during matching.
    pub reference: Option<Embedding>,
}

/// Snapshot-style read interface over the gallery store.
pub trait Gallery {
    /// Active entries, optionally restricted to one shift tag.
    fn list_active(&self, shift: Option<&str>) -> Result<Vec<GalleryEntry>, GalleryError>;

    /// Look up a single entry by identity key.
    fn entry(&self, identity: &str) -> Result<Option<GalleryEntry>, GalleryError>;
}
