//! SQLite-backed gallery and attendance store.
//!
//! Users carry two vector columns: `vector` (legacy, written by the old
//! single-capture flow) and `vector_avg` (robust-averaged). The fallback
//! between them happens exactly once, in [`GalleryStore::row_to_entry`];
//! everything above this layer sees a plain optional reference vector.

use chrono::Utc;
use rollcall_core::{Embedding, Gallery, GalleryEntry, GalleryError, EMBEDDING_DIM};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("stored vector for {identity} has {bytes} bytes, expected {expected}")]
    CorruptVector {
        identity: String,
        bytes: usize,
        expected: usize,
    },
}

/// Result of an attendance append. A duplicate identity+event pair is
/// reported, never re-inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Registered,
    AlreadyExists,
}

/// Row summary for diagnostics listings.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub identity: String,
    pub full_name: String,
    pub shift: String,
    pub active: bool,
    pub enrolled: bool,
}

pub struct GalleryStore {
    conn: Connection,
}

impl GalleryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        tracing::info!(path = %path.display(), "gallery store opened");
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                identity    TEXT PRIMARY KEY,
                full_name   TEXT NOT NULL,
                shift       TEXT NOT NULL DEFAULT 'day',
                active      INTEGER NOT NULL DEFAULT 1,
                vector      BLOB,
                vector_avg  BLOB,
                photo       BLOB,
                created_at  TEXT NOT NULL,
                updated_at  TEXT
            );
            CREATE TABLE IF NOT EXISTS attendance (
                id          TEXT PRIMARY KEY,
                identity    TEXT NOT NULL,
                event       TEXT NOT NULL,
                method      TEXT NOT NULL,
                similarity  REAL,
                recorded_at TEXT NOT NULL,
                UNIQUE (identity, event)
            );",
        )?;
        Ok(())
    }

    /// Create the user if absent, otherwise refresh name and shift.
    pub fn upsert_user(
        &self,
        identity: &str,
        full_name: &str,
        shift: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (identity, full_name, shift, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(identity) DO UPDATE
             SET full_name = excluded.full_name,
                 shift = excluded.shift,
                 updated_at = ?4",
            params![identity, full_name, shift, now],
        )?;
        Ok(())
    }

    /// Store a freshly aggregated reference vector (and profile photo) for
    /// an existing user.
    pub fn write_reference(
        &self,
        identity: &str,
        reference: &Embedding,
        photo_jpeg: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE users
             SET vector_avg = ?2, photo = coalesce(?3, photo), updated_at = ?4
             WHERE identity = ?1",
            params![identity, encode_vector(reference), photo_jpeg, now],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownIdentity(identity.to_string()));
        }
        tracing::info!(identity, "reference vector written");
        Ok(())
    }

    /// Stored profile photo, if any.
    pub fn photo(&self, identity: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let photo: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT photo FROM users WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(photo.flatten())
    }

    /// Record attendance once per identity+event; duplicates report
    /// [`AttendanceStatus::AlreadyExists`] instead of inserting.
    pub fn append_attendance(
        &self,
        identity: &str,
        event: &str,
        method: &str,
        similarity: Option<f32>,
    ) -> Result<AttendanceStatus, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (id, identity, event, method, similarity, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                identity,
                event,
                method,
                similarity,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            tracing::info!(identity, event, "attendance already recorded");
            Ok(AttendanceStatus::AlreadyExists)
        } else {
            tracing::info!(identity, event, method, "attendance recorded");
            Ok(AttendanceStatus::Registered)
        }
    }

    /// All users, for diagnostics listings.
    pub fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, full_name, shift, active,
                    (vector_avg IS NOT NULL OR vector IS NOT NULL)
             FROM users ORDER BY full_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserSummary {
                identity: row.get(0)?,
                full_name: row.get(1)?,
                shift: row.get(2)?,
                active: row.get(3)?,
                enrolled: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn user_count(&self) -> Result<u64, StoreError> {
        let n: u64 = self
            .conn
            .query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
        Ok(n)
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(GalleryEntry, Option<Vec<u8>>, Option<Vec<u8>>)> {
        let entry = GalleryEntry {
            identity: row.get(0)?,
            full_name: row.get(1)?,
            shift: row.get(2)?,
            active: row.get(3)?,
            reference: None,
        };
        let legacy: Option<Vec<u8>> = row.get(4)?;
        let averaged: Option<Vec<u8>> = row.get(5)?;
        Ok((entry, legacy, averaged))
    }

    fn finish_entry(
        (mut entry, legacy, averaged): (GalleryEntry, Option<Vec<u8>>, Option<Vec<u8>>),
    ) -> Result<GalleryEntry, StoreError> {
        // Prefer the aggregated vector; fall back to the legacy
        // single-capture column for users enrolled before averaging.
        let blob = averaged.or(legacy);
        entry.reference = match blob {
            Some(bytes) => Some(decode_vector(&entry.identity, &bytes)?),
            None => None,
        };
        Ok(entry)
    }

    fn fetch_active(&self, shift: Option<&str>) -> Result<Vec<GalleryEntry>, StoreError> {
        let sql = "SELECT identity, full_name, shift, active, vector, vector_avg
                   FROM users WHERE active = 1";
        let mut entries = Vec::new();
        match shift {
            Some(tag) => {
                let mut stmt = self.conn.prepare(&format!("{sql} AND shift = ?1"))?;
                let rows = stmt.query_map(params![tag], Self::row_to_entry)?;
                for row in rows {
                    entries.push(Self::finish_entry(row?)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(sql)?;
                let rows = stmt.query_map([], Self::row_to_entry)?;
                for row in rows {
                    entries.push(Self::finish_entry(row?)?);
                }
            }
        }
        Ok(entries)
    }

    fn fetch_entry(&self, identity: &str) -> Result<Option<GalleryEntry>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT identity, full_name, shift, active, vector, vector_avg
                 FROM users WHERE identity = ?1",
                params![identity],
                Self::row_to_entry,
            )
            .optional()?;
        raw.map(Self::finish_entry).transpose()
    }
}

impl Gallery for GalleryStore {
    fn list_active(&self, shift: Option<&str>) -> Result<Vec<GalleryEntry>, GalleryError> {
        self.fetch_active(shift)
            .map_err(|e| GalleryError::Backend(e.to_string()))
    }

    fn entry(&self, identity: &str) -> Result<Option<GalleryEntry>, GalleryError> {
        self.fetch_entry(identity)
            .map_err(|e| GalleryError::Backend(e.to_string()))
    }
}

/// Vectors are stored as little-endian f32 blobs, 2048 bytes each.
fn encode_vector(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(EMBEDDING_DIM * 4);
    for v in embedding.values() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_vector(identity: &str, bytes: &[u8]) -> Result<Embedding, StoreError> {
    if bytes.len() != EMBEDDING_DIM * 4 {
        return Err(StoreError::CorruptVector {
            identity: identity.to_string(),
            bytes: bytes.len(),
            expected: EMBEDDING_DIM * 4,
        });
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Embedding::new(values).map_err(|_| StoreError::CorruptVector {
        identity: identity.to_string(),
        bytes: bytes.len(),
        expected: EMBEDDING_DIM * 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(fill: f32) -> Embedding {
        Embedding::new(vec![fill; EMBEDDING_DIM]).unwrap()
    }

    #[test]
    fn test_vector_roundtrip() {
        let e = embedding(0.25);
        let decoded = decode_vector("x", &encode_vector(&e)).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let err = decode_vector("x", &[0u8; 12]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptVector { .. }));
    }

    #[test]
    fn test_upsert_and_entry() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("11.111.111-1", "Ada Rivas", "day").unwrap();

        let entry = store.fetch_entry("11.111.111-1").unwrap().unwrap();
        assert_eq!(entry.full_name, "Ada Rivas");
        assert!(entry.active);
        assert!(entry.reference.is_none());
        assert!(store.fetch_entry("nope").unwrap().is_none());
    }

    #[test]
    fn test_write_reference_requires_user() {
        let store = GalleryStore::open_in_memory().unwrap();
        let err = store
            .write_reference("ghost", &embedding(0.1), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentity(_)));
    }

    #[test]
    fn test_reference_roundtrip_with_photo() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("2-7", "Bo Anyan", "evening").unwrap();
        store
            .write_reference("2-7", &embedding(0.5), Some(b"jpegbytes"))
            .unwrap();

        let entry = store.fetch_entry("2-7").unwrap().unwrap();
        assert_eq!(entry.reference.unwrap(), embedding(0.5));
        assert_eq!(store.photo("2-7").unwrap().unwrap(), b"jpegbytes");
    }

    #[test]
    fn test_legacy_vector_fallback() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("3-5", "Cam Soto", "day").unwrap();
        // Simulate a row written by the old flow: only `vector` set.
        store
            .conn
            .execute(
                "UPDATE users SET vector = ?2 WHERE identity = ?1",
                params!["3-5", encode_vector(&embedding(0.3))],
            )
            .unwrap();

        let entry = store.fetch_entry("3-5").unwrap().unwrap();
        assert_eq!(entry.reference.unwrap(), embedding(0.3));

        // Once the averaged vector lands it wins over the legacy one.
        store.write_reference("3-5", &embedding(0.9), None).unwrap();
        let entry = store.fetch_entry("3-5").unwrap().unwrap();
        assert_eq!(entry.reference.unwrap(), embedding(0.9));
    }

    #[test]
    fn test_list_active_filters_shift_and_inactive() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("d1", "Day One", "day").unwrap();
        store.upsert_user("e1", "Eve One", "evening").unwrap();
        store.upsert_user("off", "Gone Person", "day").unwrap();
        store
            .conn
            .execute("UPDATE users SET active = 0 WHERE identity = 'off'", [])
            .unwrap();

        let all = store.fetch_active(None).unwrap();
        assert_eq!(all.len(), 2);

        let day = store.fetch_active(Some("day")).unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].identity, "d1");
    }

    #[test]
    fn test_attendance_idempotent() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("4-4", "Dai Ledesma", "day").unwrap();

        let first = store
            .append_attendance("4-4", "evt-1", "biometric", Some(0.91))
            .unwrap();
        assert_eq!(first, AttendanceStatus::Registered);

        let second = store
            .append_attendance("4-4", "evt-1", "biometric", Some(0.88))
            .unwrap();
        assert_eq!(second, AttendanceStatus::AlreadyExists);

        // Same identity, different event: a fresh row.
        let other = store
            .append_attendance("4-4", "evt-2", "manual", None)
            .unwrap();
        assert_eq!(other, AttendanceStatus::Registered);
    }

    #[test]
    fn test_list_users_reports_enrollment() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.upsert_user("a", "Alice", "day").unwrap();
        store.upsert_user("b", "Bruno", "day").unwrap();
        store.write_reference("a", &embedding(0.2), None).unwrap();

        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 2);
        let alice = users.iter().find(|u| u.identity == "a").unwrap();
        let bruno = users.iter().find(|u| u.identity == "b").unwrap();
        assert!(alice.enrolled);
        assert!(!bruno.enrolled);
        assert_eq!(store.user_count().unwrap(), 2);
    }
}
