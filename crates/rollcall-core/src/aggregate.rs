//! Robust reduction of enrollment samples into one reference vector.
//!
//! A handful of the frames captured during enrollment are always bad: the
//! subject looked away, the stream stuttered, another face wandered in.
//! The aggregator centers on the coordinate-wise median, measures each
//! sample's distance to it, and discards samples beyond a MAD-based
//! threshold before averaging the survivors.

use crate::matcher::euclidean_distance;
use crate::types::{Embedding, EMBEDDING_DIM};
use thiserror::Error;

/// Below this MAD the distance spread is too tight for the MAD rule to be
/// meaningful; the stddev rule takes over.
const MAD_FLOOR: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("only {got} valid samples captured, need at least {min}")]
    InsufficientSamples { got: usize, min: usize },
}

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Fewest valid samples an enrollment may produce.
    pub min_samples: usize,
    /// `k` in `median + k * MAD`.
    pub mad_multiplier: f32,
    /// `k` in `mean + k * stddev`, used when MAD collapses.
    pub stddev_multiplier: f32,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            mad_multiplier: 3.0,
            stddev_multiplier: 2.0,
        }
    }
}

/// Result of one aggregation, with filtering counts for logging.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub reference: Embedding,
    pub kept: usize,
    pub discarded: usize,
}

/// Reduce captured samples to a single reference vector.
///
/// Fails with [`AggregateError::InsufficientSamples`] when fewer than the
/// configured minimum arrived; nothing is ever persisted in that case.
pub fn robust_reference(
    samples: &[Embedding],
    cfg: &AggregateConfig,
) -> Result<AggregateOutcome, AggregateError> {
    if samples.len() < cfg.min_samples {
        return Err(AggregateError::InsufficientSamples {
            got: samples.len(),
            min: cfg.min_samples,
        });
    }

    let center = coordinate_median(samples);

    let distances: Vec<f32> = samples
        .iter()
        .map(|s| euclidean_distance(s, &center))
        .collect();

    let median_distance = median(&distances);
    let mad = median(
        &distances
            .iter()
            .map(|d| (d - median_distance).abs())
            .collect::<Vec<f32>>(),
    );

    let threshold = if mad < MAD_FLOOR {
        let mean = distances.iter().sum::<f32>() / distances.len() as f32;
        let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>()
            / distances.len() as f32;
        mean + cfg.stddev_multiplier * variance.sqrt()
    } else {
        median_distance + cfg.mad_multiplier * mad
    };

    let survivors: Vec<&Embedding> = samples
        .iter()
        .zip(distances.iter())
        .filter(|(_, d)| **d <= threshold)
        .map(|(s, _)| s)
        .collect();

    tracing::info!(
        total = samples.len(),
        kept = survivors.len(),
        threshold,
        mad,
        "outlier filtering complete"
    );

    let (reference, kept) = if survivors.is_empty() {
        // Degenerate: filtering removed everything, average the raw set.
        (mean_of(samples.iter()), samples.len())
    } else {
        (mean_of(survivors.iter().copied()), survivors.len())
    };

    Ok(AggregateOutcome {
        reference,
        kept,
        discarded: samples.len() - kept,
    })
}

/// Coordinate-wise median of a non-empty sample set.
fn coordinate_median(samples: &[Embedding]) -> Embedding {
    let mut out = Vec::with_capacity(EMBEDDING_DIM);
    let mut column = Vec::with_capacity(samples.len());
    for dim in 0..EMBEDDING_DIM {
        column.clear();
        column.extend(samples.iter().map(|s| s.values()[dim]));
        out.push(median_mut(&mut column));
    }
    Embedding::from_validated(out)
}

/// Arithmetic mean of embeddings, coordinate-wise.
fn mean_of<'a>(samples: impl Iterator<Item = &'a Embedding>) -> Embedding {
    let mut sum = vec![0.0f32; EMBEDDING_DIM];
    let mut count = 0usize;
    for s in samples {
        for (acc, v) in sum.iter_mut().zip(s.values()) {
            *acc += v;
        }
        count += 1;
    }
    if count > 0 {
        for acc in sum.iter_mut() {
            *acc /= count as f32;
        }
    }
    Embedding::from_validated(sum)
}

fn median(values: &[f32]) -> f32 {
    let mut copy = values.to_vec();
    median_mut(&mut copy)
}

/// Median with the even-count convention of averaging the two middle
/// elements.
fn median_mut(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
