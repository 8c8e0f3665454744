use std::path::PathBuf;

use crate::semantic::embeddings::EmbeddingError;

#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    #[error("failed to load catalog {}: {reason}", path.display())]
    DataLoad { path: PathBuf, reason: String },

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("catalog has no usable records")]
    EmptyIndex,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SearchError {
    pub fn data_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DataLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable(message.into())
    }

    /// Short machine-readable kind, used by the JSON front-ends.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataLoad { .. } => "data_load",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::EmptyIndex => "empty_index",
            Self::Config(_) => "config",
        }
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        Self::ModelUnavailable(err.to_string())
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
