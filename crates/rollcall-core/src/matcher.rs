//! Similarity ranking of a probe embedding against the gallery.
//!
//! Cosine similarity drives the accept/reject decision; Euclidean distance
//! rides along as a secondary diagnostic and is never part of the
//! threshold test.

use crate::gallery::{Gallery, GalleryEntry, GalleryError};
use crate::types::Embedding;
use thiserror::Error;

/// How many runner-up candidates a [`MatchResult`] carries for diagnostics.
const CANDIDATE_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("identity {0} has no reference vector")]
    NoReferenceVector(String),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// One gallery entry scored against the probe.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub entry: GalleryEntry,
    pub similarity: f32,
    pub distance: f32,
}

/// Outcome of one matching pass. Always carries the top candidates even
/// when nothing cleared the threshold, so callers can see how close the
/// nearest miss was.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    pub best: Option<MatchCandidate>,
    pub similarity: f32,
    pub distance: f32,
    pub candidates: Vec<MatchCandidate>,
    pub total_compared: usize,
}

impl MatchResult {
    fn empty() -> Self {
        Self {
            matched: false,
            best: None,
            similarity: 0.0,
            distance: f32::INFINITY,
            candidates: Vec::new(),
            total_compared: 0,
        }
    }
}

/// Outcome of a 1:1 verification.
#[derive(Debug, Clone)]
pub struct Verification {
    pub verified: bool,
    pub similarity: f32,
    pub full_name: String,
}

/// Cosine similarity clamped into [0, 1].
///
/// A zero-norm vector yields 0.0 rather than an error; negative raw cosine
/// also clamps to 0.0 since anti-correlated faces are as good as unrelated.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.values().iter().zip(b.values().iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Euclidean (L2) distance between two embeddings.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> f32 {
    a.values()
        .iter()
        .zip(b.values().iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Rank the probe against a gallery snapshot and report whether the best
/// candidate clears the threshold (inclusive boundary).
///
/// Inactive entries and entries without a reference vector are skipped,
/// never treated as zero-similarity matches.
pub fn find_match(
    query: &Embedding,
    snapshot: &[GalleryEntry],
    threshold: f32,
    shift_filter: Option<&str>,
) -> MatchResult {
    let eligible: Vec<&GalleryEntry> = snapshot
        .iter()
        .filter(|e| e.active)
        .filter(|e| shift_filter.map_or(true, |s| e.shift == s))
        .collect();

    tracing::debug!(
        eligible = eligible.len(),
        threshold,
        "ranking probe against gallery snapshot"
    );

    let mut candidates: Vec<MatchCandidate> = Vec::new();
    for entry in eligible {
        let Some(reference) = entry.reference.as_ref() else {
            tracing::warn!(identity = %entry.identity, "entry has no reference vector, skipping");
            continue;
        };
        let similarity = cosine_similarity(query, reference);
        let distance = euclidean_distance(query, reference);
        candidates.push(MatchCandidate {
            entry: entry.clone(),
            similarity,
            distance,
        });
    }

    if candidates.is_empty() {
        return MatchResult::empty();
    }

    // Descending similarity; ties are real-valued scores and broken
    // arbitrarily.
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_compared = candidates.len();
    let top = candidates[0].clone();
    candidates.truncate(CANDIDATE_LIMIT);

    if top.similarity >= threshold {
        tracing::debug!(
            identity = %top.entry.identity,
            similarity = top.similarity,
            "match above threshold"
        );
        MatchResult {
            matched: true,
            similarity: top.similarity,
            distance: top.distance,
            best: Some(top),
            candidates,
            total_compared,
        }
    } else {
        tracing::debug!(
            best_similarity = top.similarity,
            threshold,
            "no candidate cleared the threshold"
        );
        MatchResult {
            matched: false,
            similarity: top.similarity,
            distance: top.distance,
            best: None,
            candidates,
            total_compared,
        }
    }
}

/// 1:1 check of the probe against one specific enrolled identity.
pub fn verify(
    query: &Embedding,
    gallery: &dyn Gallery,
    identity: &str,
    threshold: f32,
) -> Result<Verification, VerifyError> {
    let entry = gallery
        .entry(identity)?
        .ok_or_else(|| VerifyError::IdentityNotFound(identity.to_string()))?;

    let reference = entry
        .reference
        .as_ref()
        .ok_or_else(|| VerifyError::NoReferenceVector(identity.to_string()))?;

    let similarity = cosine_similarity(query, reference);
    Ok(Verification {
        verified: similarity >= threshold,
        similarity,
        full_name: entry.full_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    fn emb(values: &[(usize, f32)]) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for &(i, x) in values {
            v[i] = x;
        }
        Embedding::new(v).unwrap()
    }

    fn entry(identity: &str, reference: Option<Embedding>) -> GalleryEntry {
        GalleryEntry {
            identity: identity.to_string(),
            full_name: format!("User {identity}"),
            shift: "day".to_string(),
            active: true,
            reference,
        }
    }

    #[test]
    fn test_cosine_similarity_identical_is_one() {
        let v = emb(&[(0, 0.3), (1, 0.7), (2, -0.2)]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_negated_clamps_to_zero() {
        let v = emb(&[(0, 1.0), (1, 2.0)]);
        let neg = Embedding::new(v.values().iter().map(|x| -x).collect()).unwrap();
        assert_eq!(cosine_similarity(&v, &neg), 0.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = emb(&[(0, 1.0), (3, 0.5)]);
        let b = emb(&[(0, 0.2), (3, 0.9), (7, 0.1)]);
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_cosine_similarity_zero_norm_is_exactly_zero() {
        let zero = Embedding::new(vec![0.0; EMBEDDING_DIM]).unwrap();
        let v = emb(&[(0, 1.0)]);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert!(!cosine_similarity(&zero, &zero).is_nan());
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(&[(0, 3.0)]);
        let b = emb(&[(1, 4.0)]);
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_find_match_exact_reference_is_full_similarity() {
        let r = emb(&[(0, 0.5), (1, 0.5)]);
        let snapshot = vec![entry("11.111.111-1", Some(r.clone()))];
        let result = find_match(&r, &snapshot, 0.48, None);
        assert!(result.matched);
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert_eq!(result.best.unwrap().entry.identity, "11.111.111-1");
        assert_eq!(result.total_compared, 1);
    }

    #[test]
    fn test_find_match_threshold_boundary_inclusive() {
        // Probe at 45 degrees to the reference: similarity = cos(45) ≈ 0.7071.
        let r = emb(&[(0, 1.0)]);
        let probe = emb(&[(0, 1.0), (1, 1.0)]);
        let snapshot = vec![entry("1-9", Some(r))];
        let sim = find_match(&probe, &snapshot, 0.0, None).similarity;

        // Exactly at the threshold counts as a match.
        assert!(find_match(&probe, &snapshot, sim, None).matched);
        assert!(!find_match(&probe, &snapshot, sim + 1e-4, None).matched);
    }

    #[test]
    fn test_find_match_empty_gallery() {
        let probe = emb(&[(0, 1.0)]);
        let result = find_match(&probe, &[], 0.48, None);
        assert!(!result.matched);
        assert!(result.best.is_none());
        assert!(result.candidates.is_empty());
        assert_eq!(result.total_compared, 0);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_find_match_skips_inactive_and_vectorless() {
        let probe = emb(&[(0, 1.0)]);
        let mut inactive = entry("2-7", Some(probe.clone()));
        inactive.active = false;
        let snapshot = vec![inactive, entry("3-5", None)];
        let result = find_match(&probe, &snapshot, 0.1, None);
        assert!(!result.matched);
        assert_eq!(result.total_compared, 0);
    }

    #[test]
    fn test_find_match_shift_filter() {
        let probe = emb(&[(0, 1.0)]);
        let mut evening = entry("4-3", Some(probe.clone()));
        evening.shift = "evening".to_string();
        let snapshot = vec![evening];
        assert!(!find_match(&probe, &snapshot, 0.5, Some("day")).matched);
        assert!(find_match(&probe, &snapshot, 0.5, Some("evening")).matched);
    }

    #[test]
    fn test_find_match_candidates_sorted_descending() {
        let probe = emb(&[(0, 1.0)]);
        let snapshot = vec![
            entry("far", Some(emb(&[(0, 0.1), (1, 1.0)]))),
            entry("near", Some(emb(&[(0, 1.0), (1, 0.1)]))),
            entry("mid", Some(emb(&[(0, 0.5), (1, 0.5)]))),
        ];
        let result = find_match(&probe, &snapshot, 0.99, None);
        let sims: Vec<f32> = result.candidates.iter().map(|c| c.similarity).collect();
        assert_eq!(result.candidates[0].entry.identity, "near");
        assert!(sims.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(result.total_compared, 3);
    }

    #[test]
    fn test_find_match_caps_candidates_at_five() {
        let probe = emb(&[(0, 1.0)]);
        let snapshot: Vec<GalleryEntry> = (0..8)
            .map(|i| entry(&format!("u{i}"), Some(emb(&[(0, 1.0), (1, i as f32 * 0.1)]))))
            .collect();
        let result = find_match(&probe, &snapshot, 0.0, None);
        assert_eq!(result.candidates.len(), 5);
        assert_eq!(result.total_compared, 8);
    }

    struct MapGallery(Vec<GalleryEntry>);

    impl Gallery for MapGallery {
        fn list_active(&self, _shift: Option<&str>) -> Result<Vec<GalleryEntry>, GalleryError> {
            Ok(self.0.iter().filter(|e| e.active).cloned().collect())
        }

        fn entry(&self, identity: &str) -> Result<Option<GalleryEntry>, GalleryError> {
            Ok(self.0.iter().find(|e| e.identity == identity).cloned())
        }
    }

    #[test]
    fn test_verify_success() {
        let r = emb(&[(0, 1.0)]);
        let gallery = MapGallery(vec![entry("5-1", Some(r.clone()))]);
        let v = verify(&r, &gallery, "5-1", 0.70).unwrap();
        assert!(v.verified);
        assert!((v.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_verify_unknown_identity() {
        let gallery = MapGallery(vec![]);
        let err = verify(&emb(&[(0, 1.0)]), &gallery, "9-9", 0.70).unwrap_err();
        assert!(matches!(err, VerifyError::IdentityNotFound(_)));
    }

    #[test]
    fn test_verify_missing_reference() {
        let gallery = MapGallery(vec![entry("6-2", None)]);
        let err = verify(&emb(&[(0, 1.0)]), &gallery, "6-2", 0.70).unwrap_err();
        assert!(matches!(err, VerifyError::NoReferenceVector(_)));
    }
}
