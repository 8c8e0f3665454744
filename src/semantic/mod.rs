//! Semantic search over the category catalog.
//!
//! Uses fastembed-rs for embeddings and brute-force cosine similarity over
//! an in-memory index.
//!
//! # Architecture
//!
//! - `embeddings`: Provider trait and the fastembed backend
//! - `cache`: Per-process text to vector memoization
//! - `index`: Immutable corpus of records and their vectors
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `search`: Cosine ranking and top-k selection
//! - `filter`: Confidence threshold
//! - `service`: One-time initialization and the query pipeline

use std::sync::Arc;

pub mod cache;
pub mod embeddings;
pub mod filter;
pub mod index;
pub mod search;
pub mod service;
pub mod storage;

pub use embeddings::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use search::SearchHit;
pub use service::{QueryOptions, SearchService, ServiceOptions};

/// Shared, immutable embedding vector.
pub type EmbeddingVector = Arc<[f32]>;

