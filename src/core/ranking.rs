//! Exact, brute-force ranking of catalog entries against a query embedding.
//!
//! A ranking call is a pure function of its inputs. It filters the snapshot
//! (missing embeddings, category), scores the survivors with cosine
//! similarity, drops anything below the threshold, orders the rest by score
//! with snapshot position as the tie-break, and truncates to `top_k`.
//! Per-candidate problems are counted in a [`RankReport`] and logged; only a
//! structurally invalid query fails the call.

use serde::Serialize;

use crate::{
    core::{
        embedding::Embedding,
        similarity::{score_candidates, ScoringMode, SkipReason},
    },
    error::{AppError, Result},
    models::catalog::{CatalogEntry, CatalogSnapshot},
};

/// Default number of results returned.
pub const DEFAULT_TOP_K: usize = 10;
/// Hard cap on `top_k`.
pub const MAX_TOP_K: usize = 200;
/// Default minimum similarity for a result.
pub const DEFAULT_THRESHOLD: f64 = 0.5;
/// Scores closer than this are treated as equal.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Parameters of a single search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query embedding.
    pub embedding: Embedding,
    /// Maximum number of results.
    pub top_k: usize,
    /// Minimum similarity a result must reach.
    pub threshold: f64,
    /// Restrict candidates to a category id or slug.
    pub category: Option<String>,
}

impl SearchQuery {
    /// Query with default `top_k`, threshold and no category filter.
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding,
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
            category: None,
        }
    }

    /// Set the result count bound.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the similarity threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Restrict to one category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.embedding.is_empty() {
            return Err(AppError::InvalidQuery(
                "query embedding is empty".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(AppError::InvalidQuery(
                "top_k must be a positive integer".to_string(),
            ));
        }
        if self.threshold.is_nan() {
            return Err(AppError::InvalidQuery("threshold is NaN".to_string()));
        }
        Ok(())
    }
}

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult<'a> {
    /// The matching catalog entry.
    #[serde(flatten)]
    pub entry: &'a CatalogEntry,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
    /// `round(clamp(similarity, 0, 1) * 100)`.
    pub match_percentage: u8,
    /// Position of the entry in the input snapshot.
    #[serde(skip)]
    pub position: usize,
}

impl<'a> RankedResult<'a> {
    fn new(entry: &'a CatalogEntry, position: usize, similarity: f64) -> Self {
        Self {
            entry,
            similarity,
            match_percentage: match_percentage(similarity),
            position,
        }
    }
}

/// Human-facing 0-100 score for a similarity.
pub fn match_percentage(similarity: f64) -> u8 {
    (similarity.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Counts of what happened to each candidate during a ranking call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RankReport {
    /// Entries in the snapshot.
    pub catalog_size: usize,
    /// Entries without an embedding.
    pub missing_embedding: usize,
    /// Entries outside the requested category.
    pub category_mismatch: usize,
    /// Entries whose embedding dimension differed from the query's.
    pub dimension_mismatch: usize,
    /// Pairs where either vector had zero magnitude.
    pub zero_magnitude: usize,
    /// Entries with NaN or infinite values.
    pub non_finite: usize,
    /// Entries that produced a score.
    pub scored: usize,
    /// Scored entries below the threshold.
    pub below_threshold: usize,
    /// Entries that passed the threshold, before truncation.
    pub passed_threshold: usize,
    /// Entries returned.
    pub returned: usize,
}

impl RankReport {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::MissingEmbedding => self.missing_embedding += 1,
            SkipReason::CategoryMismatch => self.category_mismatch += 1,
            SkipReason::DimensionMismatch { .. } => self.dimension_mismatch += 1,
            SkipReason::ZeroMagnitude => self.zero_magnitude += 1,
            SkipReason::NonFinite => self.non_finite += 1,
        }
    }

    /// Candidates dropped for being malformed or unscorable.
    pub fn anomalies(&self) -> usize {
        self.dimension_mismatch + self.zero_magnitude + self.non_finite
    }
}

/// Output of a ranking call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking<'a> {
    /// Matches, best first.
    pub results: Vec<RankedResult<'a>>,
    /// Per-candidate diagnostics.
    pub report: RankReport,
}

/// Stateless ranking engine.
///
/// Holds only configuration, so one instance can serve any number of
/// concurrent calls.
#[derive(Debug, Clone, Copy)]
pub struct RankingEngine {
    mode: ScoringMode,
    max_top_k: usize,
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self {
            mode: ScoringMode::default(),
            max_top_k: MAX_TOP_K,
        }
    }
}

impl RankingEngine {
    /// Engine with the given scoring mode and the default `top_k` cap.
    pub fn new(mode: ScoringMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Override the `top_k` cap.
    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k.max(1);
        self
    }

    /// Scoring mode in use.
    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    /// Upper bound applied to `top_k`.
    pub fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    /// Rank `catalog` against `query`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidQuery`] when the query embedding is empty,
    /// `top_k` is zero, or the threshold is NaN. Every other condition,
    /// including an empty catalog or a query that cannot be scored, yields `Ok`.
    pub fn rank<'a>(&self, query: &SearchQuery, catalog: &'a CatalogSnapshot) -> Result<Ranking<'a>> {
        query.validate()?;
        if !query.embedding.is_finite() {
            log::warn!("Query embedding contains non-finite values, nothing can be scored");
        }

        let top_k = if query.top_k > self.max_top_k {
            log::debug!("Clamping top_k {} to {}", query.top_k, self.max_top_k);
            self.max_top_k
        } else {
            query.top_k
        };

        let mut report = RankReport {
            catalog_size: catalog.len(),
            ..RankReport::default()
        };

        let category = query.category.as_deref();
        let mut positions = Vec::with_capacity(catalog.len());
        let mut candidates = Vec::with_capacity(catalog.len());
        for (position, entry) in catalog.iter().enumerate() {
            let reason = match &entry.embedding {
                None => SkipReason::MissingEmbedding,
                Some(_) if !entry.in_category(category) => SkipReason::CategoryMismatch,
                Some(embedding) => {
                    positions.push(position);
                    candidates.push(embedding);
                    continue;
                }
            };
            log::debug!("Skipping catalog entry {}: {}", entry.id, reason);
            report.record_skip(reason);
        }

        let scores = score_candidates(&query.embedding, &candidates, self.mode);

        let mut results = Vec::with_capacity(scores.len());
        for (&position, score) in positions.iter().zip(scores) {
            let entry = &catalog.entries()[position];
            match score {
                Ok(similarity) => {
                    report.scored += 1;
                    if similarity >= query.threshold {
                        results.push(RankedResult::new(entry, position, similarity));
                    } else {
                        report.below_threshold += 1;
                    }
                }
                Err(reason) => {
                    match reason {
                        SkipReason::ZeroMagnitude => {
                            log::debug!("Skipping catalog entry {}: {}", entry.id, reason)
                        }
                        _ => log::warn!("Skipping catalog entry {}: {}", entry.id, reason),
                    }
                    report.record_skip(reason);
                }
            }
        }
        report.passed_threshold = results.len();

        order_results(&mut results);
        results.truncate(top_k);
        report.returned = results.len();

        log::debug!(
            "Ranked {} of {} catalog entries: {} passed threshold {}, returning {}",
            report.scored,
            report.catalog_size,
            report.passed_threshold,
            query.threshold,
            report.returned
        );

        Ok(Ranking { results, report })
    }
}

/// Rank with the default engine and return only the ordered results.
///
/// # Errors
///
/// See [`RankingEngine::rank`].
pub fn rank<'a>(
    query_embedding: &Embedding,
    catalog: &'a CatalogSnapshot,
    top_k: usize,
    threshold: f64,
    category_filter: Option<&str>,
) -> Result<Vec<RankedResult<'a>>> {
    let query = SearchQuery {
        embedding: query_embedding.clone(),
        top_k,
        threshold,
        category: category_filter.map(str::to_string),
    };
    RankingEngine::default()
        .rank(&query, catalog)
        .map(|ranking| ranking.results)
}

/// Sort by descending similarity, breaking ties by snapshot position.
///
/// A tie group holds the scores within [`TIE_TOLERANCE`] of its highest
/// member and is ordered by position.
fn order_results(results: &mut [RankedResult<'_>]) {
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.position.cmp(&b.position))
    });

    let mut start = 0;
    while start < results.len() {
        let mut end = start + 1;
        while end < results.len()
            && results[start].similarity - results[end].similarity <= TIE_TOLERANCE
        {
            end += 1;
        }
        if end - start > 1 {
            results[start..end].sort_by_key(|r| r.position);
        }
        start = end;
    }
}
