use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality every embedding must have. Vectors of any other length
/// are rejected at the boundary, never padded or truncated.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding has {actual} components, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A face embedding vector. Immutable once constructed; carries no
/// identity until matched against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Wrap a raw vector, enforcing the fixed dimensionality.
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// Crate-internal constructor for vectors whose length is structurally
    /// guaranteed (e.g. derived coordinate-wise from validated embeddings).
    pub(crate) fn from_validated(values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), EMBEDDING_DIM);
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.values
    }
}

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Average pixel brightness (0.0-255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_with(first: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = first;
        Embedding::new(v).unwrap()
    }

    #[test]
    fn test_embedding_rejects_wrong_dimension() {
        let err = Embedding::new(vec![1.0; 128]).unwrap_err();
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, EMBEDDING_DIM);
                assert_eq!(actual, 128);
            }
        }
    }

    #[test]
    fn test_embedding_accepts_exact_dimension() {
        let e = embedding_with(1.0);
        assert_eq!(e.values().len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_norm() {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 3.0;
        v[1] = 4.0;
        let e = Embedding::new(v).unwrap();
        assert!((e.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_brightness() {
        let frame = Frame {
            data: vec![100, 200],
            width: 2,
            height: 1,
            sequence: 0,
        };
        assert!((frame.avg_brightness() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_brightness_empty() {
        let frame = Frame {
            data: vec![],
            width: 0,
            height: 0,
            sequence: 0,
        };
        assert_eq!(frame.avg_brightness(), 0.0);
    }
}
