use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};

const CONFIG_FILE: &str = "config.yaml";

/// Default catalog file, resolved against the working directory
const DEFAULT_CATALOG_PATH: &str = "Categorized_Product_List.csv";
/// Default embedding model (384 dimensions)
const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_TOP_K: usize = 5;
/// Hits must score strictly above this to be shown
const DEFAULT_SCORE_THRESHOLD: f32 = 0.35;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 30;
const DEFAULT_INIT_ATTEMPTS: u32 = 2;
const MAX_INIT_ATTEMPTS: u32 = 3;
const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Ranking and filtering parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Number of ranked hits taken before threshold filtering
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Confidence threshold [0.0, 1.0]
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Configuration for the embedding backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Upper bound on a single query embedding
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// How many times model loading is attempted before giving up
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,

    /// Persist corpus vectors to vectors.bin between runs
    #[serde(default = "default_true")]
    pub vector_cache: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            embed_timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            init_attempts: DEFAULT_INIT_ATTEMPTS,
            vector_cache: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(DEFAULT_CATALOG_PATH)
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_init_attempts() -> u32 {
    DEFAULT_INIT_ATTEMPTS
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

/// Overrides taken from the command line; `None` keeps the loaded value.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub catalog_path: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub model: Option<String>,
}

impl Config {
    pub fn validate(&self) -> SearchResult<()> {
        if self.catalog_path.as_os_str().is_empty() {
            return Err(SearchError::Config("catalog_path must not be empty".into()));
        }

        let threshold = self.search.score_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::Config(format!(
                "search.score_threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            return Err(SearchError::Config("embedding.model must not be empty".into()));
        }
        if emb.download_timeout_secs == 0 {
            return Err(SearchError::Config(
                "embedding.download_timeout_secs must be greater than 0".into(),
            ));
        }
        if emb.embed_timeout_secs == 0 {
            return Err(SearchError::Config(
                "embedding.embed_timeout_secs must be greater than 0".into(),
            ));
        }
        if !(1..=MAX_INIT_ATTEMPTS).contains(&emb.init_attempts) {
            return Err(SearchError::Config(format!(
                "embedding.init_attempts must be between 1 and {MAX_INIT_ATTEMPTS}, got {}",
                emb.init_attempts
            )));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults when it is missing.
    pub fn load_with(base_path: &Path) -> SearchResult<Self> {
        let config_path = base_path.join(CONFIG_FILE);

        if !config_path.exists() {
            log::info!("Creating default config at {}", config_path.display());
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
        }

        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            SearchError::Config(format!("cannot read {}: {e}", config_path.display()))
        })?;

        let mut config = Self::parse(&config_str)?;
        config.base_path = base_path.to_path_buf();

        Ok(config)
    }

    pub fn parse(config_str: &str) -> SearchResult<Self> {
        let config: Self = serde_yml::from_str(config_str)
            .map_err(|e| SearchError::Config(format!("config is malformed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CATMAP_*` environment overrides.
    pub fn apply_env(&mut self) -> SearchResult<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> SearchResult<()> {
        if let Some(path) = var("CATMAP_CATALOG").filter(|v| !v.trim().is_empty()) {
            self.catalog_path = PathBuf::from(path.trim());
        }
        if let Some(top_k) = var("CATMAP_TOP_K") {
            self.search.top_k = top_k.trim().parse().map_err(|_| {
                SearchError::Config(format!("CATMAP_TOP_K must be a non-negative integer, got '{top_k}'"))
            })?;
        }
        if let Some(threshold) = var("CATMAP_THRESHOLD") {
            self.search.score_threshold = threshold.trim().parse().map_err(|_| {
                SearchError::Config(format!("CATMAP_THRESHOLD must be a number, got '{threshold}'"))
            })?;
        }
        if let Some(model) = var("CATMAP_MODEL").filter(|v| !v.trim().is_empty()) {
            self.embedding.model = model.trim().to_string();
        }
        self.validate()
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) -> SearchResult<()> {
        if let Some(path) = &overrides.catalog_path {
            self.catalog_path = path.clone();
        }
        if let Some(top_k) = overrides.top_k {
            self.search.top_k = top_k;
        }
        if let Some(threshold) = overrides.score_threshold {
            self.search.score_threshold = threshold;
        }
        if let Some(model) = &overrides.model {
            self.embedding.model = model.clone();
        }
        self.validate()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn save(&self) -> SearchResult<()> {
        std::fs::create_dir_all(&self.base_path).map_err(|e| {
            SearchError::Config(format!("cannot create {}: {e}", self.base_path.display()))
        })?;

        let config_str = serde_yml::to_string(&self)
            .map_err(|e| SearchError::Config(format!("cannot serialize config: {e}")))?;

        let path = self.base_path.join(CONFIG_FILE);
        let temp_path = path.with_extension("yaml-tmp");
        std::fs::write(&temp_path, config_str.as_bytes())
            .and_then(|_| std::fs::rename(&temp_path, &path))
            .map_err(|e| SearchError::Config(format!("cannot write {}: {e}", path.display())))
    }
}
