//! Per-process embedding cache.
//!
//! Wraps any [`EmbeddingProvider`] so a text is embedded at most once. Cached
//! vectors are shared `Arc`s: a repeated lookup returns the very same vector,
//! not a recomputation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{SearchError, SearchResult};
use crate::semantic::embeddings::EmbeddingProvider;
use crate::semantic::EmbeddingVector;

pub struct CachedEmbedder {
    inner: Box<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, EmbeddingVector>>,
}

impl CachedEmbedder {
    pub fn new(inner: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    /// Number of distinct texts embedded so far.
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached vector for `text`, without computing it.
    pub fn cached(&self, text: &str) -> Option<EmbeddingVector> {
        self.cache.read().ok()?.get(text).cloned()
    }

    pub fn embed(&self, text: &str) -> SearchResult<EmbeddingVector> {
        if let Some(vector) = self.cached(text) {
            return Ok(vector);
        }

        let vector = self.inner.embed(text)?;
        self.check_dimensions(&vector)?;
        Ok(self.insert(text, vector))
    }

    /// Embed `texts`, sending only the distinct uncached ones to the provider
    /// in a single batch. Results are in input order.
    pub fn embed_batch(&self, texts: &[String]) -> SearchResult<Vec<EmbeddingVector>> {
        let mut missing: Vec<String> = vec![];
        {
            let cache = self.read_cache()?;
            for text in texts {
                if !cache.contains_key(text) && !missing.contains(text) {
                    missing.push(text.clone());
                }
            }
        }

        if !missing.is_empty() {
            log::debug!(
                "embedding {} of {} texts ({} cached)",
                missing.len(),
                texts.len(),
                texts.len() - missing.len()
            );

            let vectors = self.inner.embed_batch(&missing)?;
            if vectors.len() != missing.len() {
                return Err(SearchError::model_unavailable(format!(
                    "model returned {} embeddings for {} texts",
                    vectors.len(),
                    missing.len()
                )));
            }
            for vector in &vectors {
                self.check_dimensions(vector)?;
            }
            for (text, vector) in missing.iter().zip(vectors) {
                self.insert(text, vector);
            }
        }

        let cache = self.read_cache()?;
        texts
            .iter()
            .map(|text| {
                cache.get(text).cloned().ok_or_else(|| {
                    SearchError::model_unavailable(format!("no embedding cached for '{text}'"))
                })
            })
            .collect()
    }

    fn read_cache(
        &self,
    ) -> SearchResult<std::sync::RwLockReadGuard<'_, HashMap<String, EmbeddingVector>>> {
        self.cache
            .read()
            .map_err(|e| SearchError::model_unavailable(format!("embedding cache poisoned: {e}")))
    }

    /// First insert wins, so racing callers all observe one vector.
    fn insert(&self, text: &str, vector: Vec<f32>) -> EmbeddingVector {
        let vector: EmbeddingVector = Arc::from(vector);
        match self.cache.write() {
            Ok(mut cache) => cache.entry(text.to_string()).or_insert(vector).clone(),
            Err(_) => vector,
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> SearchResult<()> {
        let expected = self.inner.dimensions();
        if vector.len() != expected {
            return Err(SearchError::model_unavailable(format!(
                "model returned a {}-dimensional vector, expected {expected}",
                vector.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::EmbeddingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; vector encodes text length.
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        batch_sizes: Arc<RwLock<Vec<usize>>>,
    }

    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.batch_sizes.write().unwrap().push(texts.len());
            texts.iter().map(|t| self.embed(t)).collect()
        }
    }

    struct WrongDims;

    impl EmbeddingProvider for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0])
        }
    }

    fn counting() -> (CachedEmbedder, Arc<AtomicUsize>, Arc<RwLock<Vec<usize>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(RwLock::new(vec![]));
        let provider = CountingProvider {
            calls: calls.clone(),
            batch_sizes: batch_sizes.clone(),
        };
        (CachedEmbedder::new(Box::new(provider)), calls, batch_sizes)
    }

    #[test]
    fn test_repeated_embed_returns_same_vector() {
        let (embedder, calls, _) = counting();

        let first = embedder.embed("wheelchair").unwrap();
        let second = embedder.embed("wheelchair").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.len(), 1);
    }

    #[test]
    fn test_batch_only_embeds_distinct_misses() {
        let (embedder, calls, batch_sizes) = counting();
        let single = embedder.embed("a").unwrap();

        let texts: Vec<String> = ["a", "bb", "bb", "ccc"].iter().map(|s| s.to_string()).collect();
        let vectors = embedder.embed_batch(&texts).unwrap();

        assert_eq!(vectors.len(), 4);
        assert!(Arc::ptr_eq(&vectors[0], &single));
        assert!(Arc::ptr_eq(&vectors[1], &vectors[2]));
        assert_eq!(vectors[3][0], 3.0);
        assert_eq!(*batch_sizes.read().unwrap(), vec![2]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fully_cached_batch_skips_provider() {
        let (embedder, _, batch_sizes) = counting();
        let texts = vec!["x".to_string()];
        embedder.embed_batch(&texts).unwrap();
        embedder.embed_batch(&texts).unwrap();

        assert_eq!(batch_sizes.read().unwrap().len(), 1);
    }

    #[test]
    fn test_cached_lookup_does_not_compute() {
        let (embedder, calls, _) = counting();
        assert!(embedder.cached("x").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_dimensions_rejected() {
        let embedder = CachedEmbedder::new(Box::new(WrongDims));
        let result = embedder.embed("x");
        assert!(matches!(result, Err(SearchError::ModelUnavailable(_))));
        assert!(embedder.is_empty());
    }
}
