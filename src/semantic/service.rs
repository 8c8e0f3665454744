//! Semantic search service for catalog lookups.
//!
//! Owns the process-wide embedding model and corpus index:
//! - Both are created at most once, on first use or via [`SearchService::initialize`]
//! - Concurrent first callers block on the one initializer instead of racing
//! - A failed initialization leaves nothing behind; the next call starts over

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use crate::catalog::{self, CategoryRecord};
use crate::config::{Config, SearchConfig};
use crate::errors::{SearchError, SearchResult};
use crate::semantic::cache::CachedEmbedder;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
use crate::semantic::filter::filter;
use crate::semantic::index::CorpusIndex;
use crate::semantic::search::{search, SearchHit};
use crate::semantic::storage::{self, VectorStorage};
use crate::semantic::EmbeddingVector;

/// Query embeddings allowed to wait behind a busy model before callers are
/// turned away.
const EMBED_QUEUE_DEPTH: usize = 4;

/// Text to embed and where to send the result.
type EmbedJob = (String, mpsc::Sender<SearchResult<EmbeddingVector>>);

/// Builds the embedding provider. Called until it succeeds or attempts run out.
pub type ProviderLoader =
    Box<dyn Fn() -> Result<Box<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync>;

/// Settings the service needs, independent of where they came from.
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub search: SearchConfig,
    pub catalog_path: PathBuf,
    pub embed_timeout: Duration,
    pub init_attempts: u32,
    /// Where corpus vectors are persisted; `None` disables the file cache.
    pub vector_cache: Option<PathBuf>,
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search: config.search.clone(),
            catalog_path: config.catalog_path.clone(),
            embed_timeout: Duration::from_secs(config.embedding.embed_timeout_secs),
            init_attempts: config.embedding.init_attempts,
            vector_cache: config
                .embedding
                .vector_cache
                .then(|| config.base_path().join("vectors.bin")),
        }
    }

    /// Options for a catalog with default ranking and no file cache.
    pub fn for_catalog(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            search: SearchConfig::default(),
            catalog_path: catalog_path.into(),
            embed_timeout: Duration::from_secs(30),
            init_attempts: 1,
            vector_cache: None,
        }
    }
}

/// Per-call overrides of the configured ranking parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
}

/// Service for answering free-text catalog queries.
pub struct SearchService {
    options: ServiceOptions,
    loader: ProviderLoader,
    embedder: OnceCell<Arc<CachedEmbedder>>,
    index: OnceCell<CorpusIndex>,
    embed_jobs: OnceCell<SyncSender<EmbedJob>>,
}

impl SearchService {
    /// Create a service that loads its provider lazily through `loader`.
    pub fn new(options: ServiceOptions, loader: ProviderLoader) -> Self {
        Self {
            options,
            loader,
            embedder: OnceCell::new(),
            index: OnceCell::new(),
            embed_jobs: OnceCell::new(),
        }
    }

    /// Create a service around an already constructed provider.
    pub fn with_provider(options: ServiceOptions, provider: Box<dyn EmbeddingProvider>) -> Self {
        let embedder = OnceCell::new();
        let _ = embedder.set(Arc::new(CachedEmbedder::new(provider)));

        Self {
            options,
            loader: Box::new(|| {
                Err(EmbeddingError::InitFailed(
                    "provider was supplied at construction".to_string(),
                ))
            }),
            embedder,
            index: OnceCell::new(),
            embed_jobs: OnceCell::new(),
        }
    }

    /// Service backed by the fastembed model named in `config`.
    pub fn from_config(config: &Config) -> Self {
        let model = config.embedding.model.clone();
        let cache_dir = config.base_path().to_path_buf();
        let download_timeout = Duration::from_secs(config.embedding.download_timeout_secs);

        let loader: ProviderLoader = Box::new(move || {
            let provider = FastEmbedProvider::new(&model, cache_dir.clone(), Some(download_timeout))?;
            Ok(Box::new(provider) as Box<dyn EmbeddingProvider>)
        });

        Self::new(ServiceOptions::from_config(config), loader)
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.index.get().is_some()
    }

    /// Number of indexed records; 0 before initialization.
    pub fn indexed_count(&self) -> usize {
        self.index.get().map(|index| index.len()).unwrap_or(0)
    }

    /// Model name, once the provider is loaded.
    pub fn model_name(&self) -> Option<&str> {
        self.embedder.get().map(|e| e.model_name())
    }

    /// Indexed records in catalog order.
    pub fn catalog(&self) -> SearchResult<Vec<CategoryRecord>> {
        Ok(self.index()?.records().cloned().collect())
    }

    /// Force initialization of the model and corpus index.
    ///
    /// Normally initialization happens lazily on the first query.
    pub fn initialize(&self) -> SearchResult<()> {
        self.index().map(|_| ())
    }

    /// Answer `text` with the configured `top_k` and threshold.
    pub fn run_query(&self, text: &str) -> SearchResult<Vec<SearchHit>> {
        self.run_query_with(text, QueryOptions::default())
    }

    /// Ranked, threshold-filtered hits for `text`.
    ///
    /// Blank text yields no hits without loading anything.
    pub fn run_query_with(&self, text: &str, opts: QueryOptions) -> SearchResult<Vec<SearchHit>> {
        let top_k = opts.top_k.unwrap_or(self.options.search.top_k);
        let threshold = opts.threshold.unwrap_or(self.options.search.score_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::Config(format!(
                "threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }

        let index = self.index()?;
        let embedder = self.embedder()?;

        let now = Instant::now();
        let query = self.embed_query(embedder, text)?;
        let ranked = search(&query, index, top_k)?;
        let ranked_count = ranked.len();
        let hits = filter(ranked, threshold);

        log::debug!(
            "query {:?}: {} ranked, {} above {} in {}ms",
            text,
            ranked_count,
            hits.len(),
            threshold,
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(hits)
    }

    fn embedder(&self) -> SearchResult<&Arc<CachedEmbedder>> {
        self.embedder.get_or_try_init(|| self.load_embedder())
    }

    fn index(&self) -> SearchResult<&CorpusIndex> {
        self.index.get_or_try_init(|| {
            // catalog first: a bad catalog must fail before the model loads
            let catalog = catalog::load(&self.options.catalog_path)?;
            if catalog.is_empty() {
                return Err(SearchError::EmptyIndex);
            }

            let embedder = self.embedder()?;
            self.build_index(catalog.into_records(), embedder)
        })
    }

    fn load_embedder(&self) -> SearchResult<Arc<CachedEmbedder>> {
        let attempts = self.options.init_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            let now = Instant::now();
            match (self.loader)() {
                Ok(provider) => {
                    log::info!(
                        "embedding model '{}' ready ({} dims) in {}ms",
                        provider.model_name(),
                        provider.dimensions(),
                        now.elapsed().as_millis()
                    );
                    return Ok(Arc::new(CachedEmbedder::new(provider)));
                }
                Err(e) => {
                    log::warn!("embedding model load attempt {attempt}/{attempts} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .map(SearchError::from)
            .unwrap_or_else(|| SearchError::model_unavailable("model was never loaded")))
    }

    fn build_index(
        &self,
        records: Vec<CategoryRecord>,
        embedder: &CachedEmbedder,
    ) -> SearchResult<CorpusIndex> {
        let now = Instant::now();
        let model_id = storage::model_id(embedder.model_name());
        let fingerprint = storage::catalog_fingerprint(&records);
        let vector_storage = self.options.vector_cache.clone().map(VectorStorage::new);

        if let Some(vector_storage) = vector_storage.as_ref().filter(|s| s.exists()) {
            let loaded = vector_storage
                .load(&model_id, &fingerprint, embedder.dimensions(), records.len())
                .map_err(|e| e.to_string())
                .and_then(|vectors| {
                    CorpusIndex::from_parts(records.clone(), vectors).map_err(|e| e.to_string())
                });

            match loaded {
                Ok(index) => {
                    log::info!(
                        "loaded {} corpus vectors from {}",
                        index.len(),
                        vector_storage.path().display()
                    );
                    return Ok(index);
                }
                Err(e) => log::warn!(
                    "ignoring {}, re-embedding catalog: {}",
                    vector_storage.path().display(),
                    e
                ),
            }
        }

        let index = CorpusIndex::build(records, embedder)?;
        log::info!(
            "embedded {} catalog records in {}ms",
            index.len(),
            now.elapsed().as_millis()
        );

        if let Some(vector_storage) = &vector_storage {
            if let Err(e) = vector_storage.save(&index, &model_id, &fingerprint) {
                log::warn!(
                    "could not write {}: {}",
                    vector_storage.path().display(),
                    e
                );
            }
        }

        Ok(index)
    }

    /// The single thread that runs query embeddings, started on first use.
    fn embed_worker(&self, embedder: &Arc<CachedEmbedder>) -> SearchResult<&SyncSender<EmbedJob>> {
        self.embed_jobs.get_or_try_init(|| {
            let (tx, rx) = mpsc::sync_channel::<EmbedJob>(EMBED_QUEUE_DEPTH);
            let worker = Arc::clone(embedder);
            std::thread::Builder::new()
                .name("catmap-embed".to_string())
                .spawn(move || {
                    for (text, reply) in rx {
                        // the caller may have stopped waiting
                        let _ = reply.send(worker.embed(&text));
                    }
                })
                .map_err(|e| {
                    SearchError::model_unavailable(format!("cannot start embedding worker: {e}"))
                })?;
            Ok(tx)
        })
    }

    /// Embed a query on the worker thread so a hung model surfaces as an error.
    fn embed_query(
        &self,
        embedder: &Arc<CachedEmbedder>,
        text: &str,
    ) -> SearchResult<EmbeddingVector> {
        if let Some(vector) = embedder.cached(text) {
            return Ok(vector);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        match self.embed_worker(embedder)?.try_send((text.to_string(), reply_tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("{EMBED_QUEUE_DEPTH} query embeddings already waiting, rejecting {text:?}");
                return Err(SearchError::model_unavailable(
                    "embedding model is not responding, too many queries waiting",
                ));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(SearchError::model_unavailable("embedding worker has stopped"));
            }
        }

        match reply_rx.recv_timeout(self.options.embed_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "embedding {text:?} exceeded {:?}, result will be discarded",
                    self.options.embed_timeout
                );
                Err(EmbeddingError::Timeout(self.options.embed_timeout).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(SearchError::model_unavailable(
                "embedding worker stopped without a result",
            )),
        }
    }
}
