//! Cosine scoring between a query embedding and catalog embeddings.
//!
//! Scores are computed in `f64` and clamped to `[-1, 1]`. A pair that cannot
//! be scored (different dimensions, non-finite values, or a zero-magnitude
//! vector) yields a [`SkipReason`] instead of a number: an undefined
//! similarity must never rank as a match or as a confident non-match.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::core::embedding::{Embedding, ZERO_MAGNITUDE_EPSILON};

/// Why a candidate was left out of the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The entry carries no embedding.
    MissingEmbedding,
    /// The entry is outside the requested category.
    CategoryMismatch,
    /// The embedding dimension differs from the query's.
    DimensionMismatch {
        /// Query dimension.
        expected: usize,
        /// Candidate dimension.
        found: usize,
    },
    /// One of the two vectors has (near) zero magnitude.
    ZeroMagnitude,
    /// The embedding contains NaN or infinite values.
    NonFinite,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEmbedding => write!(f, "no embedding"),
            Self::CategoryMismatch => write!(f, "category mismatch"),
            Self::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch (expected {}, found {})", expected, found)
            }
            Self::ZeroMagnitude => write!(f, "zero-magnitude vector"),
            Self::NonFinite => write!(f, "non-finite values"),
        }
    }
}

/// How candidate scores are computed.
///
/// Both modes produce the same scores; `Batch` stacks the candidates into a
/// matrix and scores them with a single matrix-vector product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// One matrix-vector product over all candidates.
    #[default]
    Batch,
    /// One dot product per candidate.
    PerCandidate,
}

impl FromStr for ScoringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "per_candidate" | "per-candidate" | "scalar" => Ok(Self::PerCandidate),
            other => Err(format!("unknown scoring mode: {}", other)),
        }
    }
}

/// Cosine similarity between two embeddings.
///
/// Symmetric in its arguments. Fails with a [`SkipReason`] when the pair is
/// not comparable.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f64, SkipReason> {
    if !a.is_comparable(b) {
        return Err(SkipReason::DimensionMismatch {
            expected: a.dim(),
            found: b.dim(),
        });
    }
    if !a.is_finite() || !b.is_finite() {
        return Err(SkipReason::NonFinite);
    }
    let a = a.to_f64();
    let b = b.to_f64();
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    finish(a.dot(&b), norm_a, norm_b)
}

/// Score every candidate against `query` using the given mode.
///
/// The output is aligned with `candidates`.
pub fn score_candidates(
    query: &Embedding,
    candidates: &[&Embedding],
    mode: ScoringMode,
) -> Vec<Result<f64, SkipReason>> {
    match mode {
        ScoringMode::Batch => score_batch(query, candidates),
        ScoringMode::PerCandidate => score_each(query, candidates),
    }
}

/// Score candidates one dot product at a time.
pub fn score_each(query: &Embedding, candidates: &[&Embedding]) -> Vec<Result<f64, SkipReason>> {
    let q = query.to_f64();
    let q_norm = q.dot(&q).sqrt();
    candidates
        .iter()
        .map(|candidate| {
            check_candidate(query, candidate)?;
            let c = candidate.to_f64();
            let c_norm = c.dot(&c).sqrt();
            finish(c.dot(&q), q_norm, c_norm)
        })
        .collect()
}

/// Score all comparable candidates with a single matrix-vector product.
pub fn score_batch(query: &Embedding, candidates: &[&Embedding]) -> Vec<Result<f64, SkipReason>> {
    let mut out: Vec<Result<f64, SkipReason>> = candidates
        .iter()
        .map(|candidate| check_candidate(query, candidate).map(|_| 0.0))
        .collect();

    let rows: Vec<usize> = out
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.is_ok().then_some(i))
        .collect();
    if rows.is_empty() {
        return out;
    }

    let dim = query.dim();
    let mut matrix = Array2::<f64>::zeros((rows.len(), dim));
    for (mut row, &idx) in matrix.outer_iter_mut().zip(&rows) {
        row.assign(&candidates[idx].view().mapv(f64::from));
    }

    let q = query.to_f64();
    let q_norm = q.dot(&q).sqrt();
    let dots: Array1<f64> = matrix.dot(&q);
    let norms: Array1<f64> = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

    for (k, &idx) in rows.iter().enumerate() {
        out[idx] = finish(dots[k], q_norm, norms[k]);
    }
    out
}

fn check_candidate(query: &Embedding, candidate: &Embedding) -> Result<(), SkipReason> {
    if !query.is_comparable(candidate) {
        return Err(SkipReason::DimensionMismatch {
            expected: query.dim(),
            found: candidate.dim(),
        });
    }
    if !candidate.is_finite() {
        return Err(SkipReason::NonFinite);
    }
    Ok(())
}

fn finish(dot: f64, norm_a: f64, norm_b: f64) -> Result<f64, SkipReason> {
    if norm_a <= ZERO_MAGNITUDE_EPSILON || norm_b <= ZERO_MAGNITUDE_EPSILON {
        return Err(SkipReason::ZeroMagnitude);
    }
    let score = dot / (norm_a * norm_b);
    if !score.is_finite() {
        return Err(SkipReason::NonFinite);
    }
    Ok(score.clamp(-1.0, 1.0))
}
