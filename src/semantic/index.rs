//! Immutable in-memory corpus index.
//!
//! Holds one embedding per catalog record, in catalog order.

use crate::catalog::CategoryRecord;
use crate::errors::{SearchError, SearchResult};
use crate::semantic::cache::CachedEmbedder;
use crate::semantic::EmbeddingVector;

/// An entry in the corpus index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub record: CategoryRecord,
    pub embedding: EmbeddingVector,
}

/// Catalog records paired with their embeddings.
///
/// Built once and never mutated; callers only read through it.
#[derive(Debug)]
pub struct CorpusIndex {
    entries: Vec<IndexEntry>,
    dimensions: usize,
}

impl CorpusIndex {
    /// Embed every record's `full_path` in one batch and pair the vectors
    /// with their records, preserving order.
    pub fn build(records: Vec<CategoryRecord>, embedder: &CachedEmbedder) -> SearchResult<Self> {
        if records.is_empty() {
            return Err(SearchError::EmptyIndex);
        }

        let texts: Vec<String> = records.iter().map(|r| r.full_path.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;

        Self::from_parts(records, vectors)
    }

    /// Reassemble an index from records and already computed vectors.
    pub fn from_parts(
        records: Vec<CategoryRecord>,
        vectors: Vec<EmbeddingVector>,
    ) -> SearchResult<Self> {
        if records.is_empty() {
            return Err(SearchError::EmptyIndex);
        }
        if records.len() != vectors.len() {
            return Err(SearchError::model_unavailable(format!(
                "{} vectors for {} records",
                vectors.len(),
                records.len()
            )));
        }

        let dimensions = vectors[0].len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(SearchError::model_unavailable(format!(
                "Dimension mismatch: expected {dimensions}, got {}",
                bad.len()
            )));
        }

        let entries = records
            .into_iter()
            .zip(vectors)
            .map(|(record, embedding)| IndexEntry { record, embedding })
            .collect();

        Ok(Self {
            entries,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &CategoryRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn vectors(&self) -> impl Iterator<Item = &EmbeddingVector> {
        self.entries.iter().map(|e| &e.embedding)
    }
}
