//! Top-level façade (A2): wires storage, embedding, LLM, and chunking
//! collaborators behind one handle and exposes the public operations named
//! across C2-C10. Callers construct the collaborators themselves — this
//! crate never reaches for a default API key or network client.

use crate::cancel::CancellationToken;
use crate::chunking::{Chunker, WordBoundaryChunker};
use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::ingest;
use crate::lifecycle;
use crate::llm::{LlmClient, LlmTransport};
use crate::search;
use crate::storage::Storage;
use crate::types::{
    AddMemoryResult, CognifyOptions, CognifyResult, CreateMemoryInput, ListMemoriesOptions, Memory, MemorySummary,
    PruneOptions, PruneResult, SearchOptions, SearchResult, UpdateMemoryPatch,
};

/// The engine handle. Generic over the LLM transport so callers can supply
/// their own provider (or a test double) without this crate depending on a
/// specific one; the embedder and chunker are boxed trait objects since
/// `search`/`cognify` never need to be generic over their concrete type.
pub struct Engine<T: LlmTransport> {
    storage: Storage,
    embedder: Box<dyn Embedder>,
    llm: LlmClient<T>,
    chunker: Box<dyn Chunker>,
    config: EngineConfig,
}

impl<T: LlmTransport> Engine<T> {
    /// Opens (creating if necessary) the database at `config.db_path` and
    /// wires it to the supplied collaborators with the default
    /// `WordBoundaryChunker`.
    pub fn open(config: EngineConfig, embedder: Box<dyn Embedder>, transport: T) -> Result<Self> {
        let storage = Storage::open(config.db_path.clone())?;
        Ok(Self::with_storage(storage, config, embedder, transport))
    }

    /// Same as `open`, but against an already-constructed `Storage` — used
    /// by tests and by callers sharing one database across engines.
    pub fn with_storage(storage: Storage, config: EngineConfig, embedder: Box<dyn Embedder>, transport: T) -> Self {
        Self {
            storage,
            embedder,
            llm: LlmClient::new(transport),
            chunker: Box::new(WordBoundaryChunker::default()),
            config,
        }
    }

    /// Overrides the default chunker.
    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Ingests raw text into the graph store (C8). Does not create a
    /// `Memory` — use `add_memory` for first-class, versioned knowledge.
    pub async fn cognify(
        &self,
        text: &str,
        source: Option<&str>,
        options: &CognifyOptions,
        cancel: &CancellationToken,
    ) -> Result<CognifyResult> {
        ingest::cognify(
            &self.storage,
            self.embedder.as_ref(),
            &self.llm,
            self.chunker.as_ref(),
            text,
            source,
            options,
            cancel,
        )
        .await
    }

    pub async fn add_memory(&self, input: CreateMemoryInput, cancel: &CancellationToken) -> Result<AddMemoryResult> {
        ingest::add_memory(&self.storage, self.embedder.as_ref(), &self.llm, &self.config, input, cancel).await
    }

    pub async fn update_memory(
        &self,
        id: &str,
        patch: &UpdateMemoryPatch,
        cancel: &CancellationToken,
    ) -> Result<Memory> {
        ingest::update_memory(&self.storage, self.embedder.as_ref(), &self.llm, id, patch, cancel).await
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        ingest::delete_memory(&self.storage, id)
    }

    pub fn get_memory(&self, id: &str) -> Result<Memory> {
        self.storage.get_memory(id)
    }

    pub fn peek_memory(&self, id: &str) -> Result<Memory> {
        self.storage.peek_memory(id)
    }

    pub fn list_memories(&self, options: &ListMemoriesOptions) -> Result<Vec<MemorySummary>> {
        self.storage.list_memories(options)
    }

    pub fn pin_memory(&self, id: &str, reason: Option<&str>) -> Result<()> {
        self.storage.pin_memory(id, reason)
    }

    pub fn unpin_memory(&self, id: &str) -> Result<()> {
        self.storage.unpin_memory(id)
    }

    pub fn get_supersession_chain(&self, id: &str) -> Result<Vec<String>> {
        self.storage.get_supersession_chain(id)
    }

    /// Hybrid/vector/graph search over the graph store (C9), with
    /// decay-aware scoring per `self.config`.
    pub async fn search(&self, query: &str, options: &SearchOptions, cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        search::search(&self.storage, self.embedder.as_ref(), &self.config, query, options, cancel).await
    }

    /// Runs the lifecycle policies (C10): memory-level supersession and
    /// retention pruning, then node-level decay/age pruning.
    pub fn prune(&self, options: &PruneOptions) -> Result<PruneResult> {
        lifecycle::prune(&self.storage, &self.config, options)
    }

    pub fn node_count(&self) -> Result<i64> {
        self.storage.node_count()
    }

    pub fn edge_count(&self) -> Result<i64> {
        self.storage.edge_count()
    }

    pub fn memory_count(&self) -> Result<i64> {
        self.storage.count_memories()
    }
}
