//! Embeddable knowledge-graph memory engine: ingests text, extracts typed
//! entities and relations, embeds and stores them in a graph + vector index,
//! tracks provenance back to first-class memories, and answers hybrid
//! vector/graph queries with decay-aware scoring.

pub mod cancel;
pub mod chunking;
pub mod codec;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod ids;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod search;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngramError, Result};
pub use storage::Storage;
pub use types::*;

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
