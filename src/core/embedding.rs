use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Magnitude at or below which an embedding is treated as the zero vector.
pub const ZERO_MAGNITUDE_EPSILON: f64 = 1e-8;

/// A fixed-length feature vector describing an image.
///
/// Embeddings are immutable once built. Two embeddings are comparable only
/// when their dimensions match; nothing in this crate pads or truncates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Array1<f32>,
}

impl Embedding {
    /// Wrap a vector of feature values.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values: Array1::from(values),
        }
    }

    /// Number of elements.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when the embedding has no elements at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Element at `index`, if any.
    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Read-only view over the values.
    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.values.view()
    }

    /// Values as a contiguous slice.
    pub fn as_slice(&self) -> &[f32] {
        // Array1 built from a Vec is always in standard layout.
        self.values.as_slice().unwrap_or(&[])
    }

    /// Iterate over the values in order.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied()
    }

    /// Values widened to `f64`, the precision used for scoring.
    pub fn to_f64(&self) -> Array1<f64> {
        self.values.mapv(f64::from)
    }

    /// Euclidean norm computed in `f64`.
    pub fn magnitude(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }

    /// True when the magnitude is numerically indistinguishable from zero.
    pub fn is_zero(&self) -> bool {
        self.magnitude() <= ZERO_MAGNITUDE_EPSILON
    }

    /// True when every element is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Whether `other` has the same dimension and can be compared to `self`.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        self.dim() == other.dim()
    }

    /// Consume the embedding and return the raw values.
    pub fn into_vec(self) -> Vec<f32> {
        self.values.to_vec()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl From<Array1<f32>> for Embedding {
    fn from(values: Array1<f32>) -> Self {
        // Re-own through a Vec so the slice view is always contiguous.
        Self::new(values.to_vec())
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.into_vec()
    }
}

impl FromIterator<f32> for Embedding {
    fn from_iter<I: IntoIterator<Item = f32>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_and_access() {
        let e = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(e.dim(), 3);
        assert_eq!(e.get(1), Some(2.0));
        assert_eq!(e.get(3), None);
        assert_eq!(e.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_magnitude() {
        let e = Embedding::new(vec![3.0, 4.0]);
        assert!((e.magnitude() - 5.0).abs() < 1e-12);
        assert!(!e.is_zero());
    }

    #[test]
    fn test_zero_vector_is_valid_value() {
        let e = Embedding::new(vec![0.0; 8]);
        assert_eq!(e.dim(), 8);
        assert!(e.is_zero());

        let tiny = Embedding::new(vec![1e-12, 0.0]);
        assert!(tiny.is_zero());
    }

    #[test]
    fn test_comparable() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        let c = Embedding::new(vec![0.0, 1.0, 0.0]);
        assert!(a.is_comparable(&b));
        assert!(!a.is_comparable(&c));
    }

    #[test]
    fn test_finite() {
        assert!(Embedding::new(vec![1.0, -2.0]).is_finite());
        assert!(!Embedding::new(vec![1.0, f32::NAN]).is_finite());
        assert!(!Embedding::new(vec![f32::INFINITY]).is_finite());
    }

    #[test]
    fn test_serde_as_plain_array() {
        let e = Embedding::new(vec![0.5, -1.0]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[0.5,-1.0]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
