//! Cosine similarity ranking over a [`CorpusIndex`].
//!
//! Scores are raw cosine similarity clipped to `[0, 1]`. Negative cosine
//! (opposed direction) counts as unrelated and scores 0.

use serde::Serialize;

use crate::catalog::CategoryRecord;
use crate::errors::{SearchError, SearchResult};
use crate::semantic::index::{CorpusIndex, IndexEntry};

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: CategoryRecord,
    /// Similarity in `[0.0, 1.0]`
    pub score: f32,
}

impl SearchHit {
    /// Score as a whole percentage, truncated.
    pub fn percent(&self) -> u8 {
        (self.score * 100.0).clamp(0.0, 100.0) as u8
    }
}

/// Rank every indexed entry against `query` and keep the best `top_k`.
///
/// Ordered by descending score; equal scores keep corpus order.
pub fn search(query: &[f32], index: &CorpusIndex, top_k: usize) -> SearchResult<Vec<SearchHit>> {
    if index.is_empty() {
        return Err(SearchError::EmptyIndex);
    }

    if query.len() != index.dimensions() {
        return Err(SearchError::model_unavailable(format!(
            "Dimension mismatch: expected {}, got {}",
            index.dimensions(),
            query.len()
        )));
    }

    let query_norm = l2_norm(query);

    let mut scored: Vec<(&IndexEntry, f32)> = index
        .iter()
        .map(|entry| (entry, score(query, query_norm, &entry.embedding)))
        .collect();

    // sort_by is stable, ties stay in corpus order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(entry, score)| SearchHit {
            record: entry.record.clone(),
            score,
        })
        .collect())
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity clipped into `[0, 1]`; zero-norm vectors score 0.
fn score(query: &[f32], query_norm: f32, target: &[f32]) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm < f32::EPSILON || target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let cosine = dot_product / (query_norm * target_norm);
    if cosine.is_nan() {
        return 0.0;
    }
    cosine.clamp(0.0, 1.0)
}
