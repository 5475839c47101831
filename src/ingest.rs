//! Write pipeline (C8): `cognify`'s document-to-graph ingestion and the
//! memory-level add/update/delete operations that sit on top of it.
//!
//! Every stage that calls out to an LLM or an embedding provider runs with
//! no storage lock held; only the short `process_chunk` sub-steps (each a
//! single upsert) ever touch `Storage`, matching §5's requirement that no
//! lock spans an LLM or embedding round trip.

use std::collections::HashMap;

use chrono::Utc;

use crate::cancel::CancellationToken;
use crate::chunking::Chunker;
use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::extraction;
use crate::ids::{document_hash, normalize_name};
use crate::llm::{LlmClient, LlmTransport};
use crate::storage::Storage;
use crate::types::{
    AddMemoryResult, CognifyOptions, CognifyResult, CreateMemoryInput, Memory, MemoryStatus, Node,
    UpdateMemoryPatch,
};

/// Result of running one chunk of text through extraction, embedding, and
/// graph upsert. Carried up by both `cognify` (aggregated across chunks)
/// and the memory pipeline (used directly as one chunk's provenance).
#[derive(Debug, Default)]
struct ChunkOutcome {
    node_ids: Vec<String>,
    edge_ids: Vec<String>,
    nodes_created: u64,
    edges_created: u64,
    edges_skipped: u64,
    errors: Vec<String>,
}

/// Extracts entities and relations from `chunk`, embeds the entities in one
/// batch call, and upserts the resulting nodes and edges. The only
/// ambient-stack call that is not a single `Storage` round trip is the LLM
/// extraction and the embedding batch, both of which happen before any node
/// is written.
async fn process_chunk<T: LlmTransport>(
    storage: &Storage,
    embedder: &dyn Embedder,
    llm: &LlmClient<T>,
    chunk: &str,
    cancel: &CancellationToken,
) -> Result<ChunkOutcome> {
    let mut outcome = ChunkOutcome::default();
    if chunk.trim().is_empty() {
        return Ok(outcome);
    }

    let entities = extraction::extract_entities(llm, chunk, cancel).await?;
    if entities.is_empty() {
        return Ok(outcome);
    }

    let descriptions: Vec<&str> = entities.iter().map(|e| e.description.as_str()).collect();
    // A failed embedding batch must not block the whole chunk: entities are
    // still worth storing (and linking into edges) without a vector, so the
    // chunk degrades to graph-only for this batch rather than aborting.
    let embeddings = match embedder.embed_batch(&descriptions, cancel).await {
        Ok(embeddings) => embeddings.into_iter().map(Some).collect(),
        Err(err) => {
            outcome
                .errors
                .push(format!("embedding batch failed, storing entities without embeddings: {err}"));
            vec![None; entities.len()]
        }
    };

    let mut name_to_id: HashMap<String, String> = HashMap::new();
    for (entity, embedding) in entities.iter().zip(embeddings.into_iter()) {
        let id = crate::ids::node_id(&entity.name, entity.entity_type);
        let first_occurrence = !storage.node_exists(&id)?;

        let mut node = Node::new(entity.name.as_str(), entity.entity_type, entity.description.as_str());
        node.id = id.clone();
        node.embedding = embedding.clone();
        let node = storage.add_node(node)?;
        if let Some(embedding) = &embedding {
            storage.vector_add(&node.id, embedding)?;
        }

        if first_occurrence {
            outcome.nodes_created += 1;
        }
        outcome.node_ids.push(node.id.clone());
        name_to_id.insert(normalize_name(&entity.name), node.id);
    }

    let (triplets, skip_reasons) = extraction::extract_relations(llm, chunk, &entities, cancel).await?;
    outcome.edges_skipped += skip_reasons.len() as u64;
    outcome.errors.extend(skip_reasons);

    for triplet in triplets {
        let (Some(source_id), Some(target_id)) = (
            name_to_id.get(&normalize_name(&triplet.subject)),
            name_to_id.get(&normalize_name(&triplet.object)),
        ) else {
            outcome.edges_skipped += 1;
            outcome.errors.push(format!(
                "skipped edge: '{}' -> '{}' could not be resolved after relation extraction",
                triplet.subject, triplet.object
            ));
            continue;
        };

        let edge = crate::types::Edge::new(source_id.as_str(), triplet.relation.as_str(), target_id.as_str());
        match storage.add_edge(edge) {
            Ok(edge) => {
                outcome.edges_created += 1;
                outcome.edge_ids.push(edge.id);
            }
            Err(err) => {
                outcome.edges_skipped += 1;
                outcome.errors.push(format!("skipped edge: {err}"));
            }
        }
    }

    Ok(outcome)
}

/// Chunks `text`, extracts and upserts graph artifacts per chunk, and marks
/// the document processed by content hash so a repeat `cognify` call with
/// `skip_processed` (the default) is a no-op.
pub async fn cognify<T: LlmTransport>(
    storage: &Storage,
    embedder: &dyn Embedder,
    llm: &LlmClient<T>,
    chunker: &dyn Chunker,
    text: &str,
    source: Option<&str>,
    options: &CognifyOptions,
    cancel: &CancellationToken,
) -> Result<CognifyResult> {
    let mut result = CognifyResult::default();
    let hash = document_hash(text);

    if options.skip_processed && !options.force && storage.is_processed(&hash)? {
        result.documents_skipped = 1;
        return Ok(result);
    }

    let chunks = chunker.chunk(text);
    for chunk in &chunks {
        cancel.check()?;
        result.chunks_processed += 1;
        match process_chunk(storage, embedder, llm, chunk, cancel).await {
            Ok(outcome) => {
                result.nodes_created += outcome.nodes_created;
                result.edges_created += outcome.edges_created;
                result.edges_skipped += outcome.edges_skipped;
                result.errors.extend(outcome.errors);
            }
            Err(err) => {
                result.chunks_failed += 1;
                result.errors.push(err.to_string());
            }
        }
    }

    storage.mark_processed(&hash, source, chunks.len() as i64)?;
    result.documents_processed = 1;
    Ok(result)
}

fn combined_memory_text(topic: &str, context: &str, decisions: &[String], rationale: &[String]) -> String {
    format!("{topic}\n{context}\n{}\n{}", decisions.join("\n"), rationale.join("\n"))
}

/// Creates a memory, deduplicating on canonical content hash against any
/// existing `Active` memory, then derives its graph provenance from the
/// combined topic/context/decisions/rationale text via the same
/// extract-embed-upsert path `cognify` uses for raw documents.
pub async fn add_memory<T: LlmTransport>(
    storage: &Storage,
    embedder: &dyn Embedder,
    llm: &LlmClient<T>,
    _config: &EngineConfig,
    input: CreateMemoryInput,
    cancel: &CancellationToken,
) -> Result<AddMemoryResult> {
    let doc_hash = crate::types::compute_doc_hash(&input.topic, &input.context, &input.decisions, &input.rationale);

    if let Some(existing) = storage.find_memory_by_doc_hash_active(&doc_hash)? {
        return Ok(AddMemoryResult {
            memory_id: existing.id,
            nodes_created: 0,
            edges_created: 0,
            memories_superseded: 0,
            status: existing.status,
        });
    }

    let now = Utc::now();
    let memory = Memory {
        id: crate::types::new_memory_id(),
        topic: input.topic,
        context: input.context,
        decisions: input.decisions,
        rationale: input.rationale,
        metadata: input.metadata,
        doc_hash,
        source: input.source,
        version: 1,
        status: MemoryStatus::Pending,
        created_at: now,
        updated_at: now,
        access_count: 0,
        last_accessed_at: None,
        access_velocity: 0.0,
        superseded_by: None,
        retention_policy: input.retention_policy.unwrap_or(crate::types::RetentionPolicy::Standard),
        retention_until: None,
        pinned: false,
        pinned_at: None,
        pinned_reason: None,
    };
    let memory = storage.add_memory(memory)?;

    let combined = combined_memory_text(&memory.topic, &memory.context, &memory.decisions, &memory.rationale);
    let outcome = process_chunk(storage, embedder, llm, &combined, cancel).await?;
    storage.link_provenance(&memory.id, &outcome.node_ids, &outcome.edge_ids)?;

    let mut memories_superseded = 0u64;
    for superseded_id in &input.supersedes {
        storage.record_supersession(&memory.id, superseded_id, None)?;
        memories_superseded += 1;
    }

    storage.set_memory_status(&memory.id, MemoryStatus::Active)?;

    Ok(AddMemoryResult {
        memory_id: memory.id,
        nodes_created: outcome.nodes_created,
        edges_created: outcome.edges_created,
        memories_superseded,
        status: MemoryStatus::Active,
    })
}

/// Applies `patch`, then — only when a content field actually changed —
/// re-derives graph provenance from the new combined text and swaps it in
/// for the old set: the old node/edge ids are captured before the update,
/// provenance is unlinked and relinked to the freshly extracted artifacts,
/// and `garbage_collect_candidates` reclaims any old artifact no longer
/// referenced by this or any other memory.
pub async fn update_memory<T: LlmTransport>(
    storage: &Storage,
    embedder: &dyn Embedder,
    llm: &LlmClient<T>,
    id: &str,
    patch: &UpdateMemoryPatch,
    cancel: &CancellationToken,
) -> Result<Memory> {
    let content_changed =
        patch.topic.is_some() || patch.context.is_some() || patch.decisions.is_some() || patch.rationale.is_some();

    if content_changed {
        let (old_node_ids, old_edge_ids) = storage.get_provenance_by_memory(id)?;

        let updated = storage.update_memory(id, patch)?;
        let combined = combined_memory_text(&updated.topic, &updated.context, &updated.decisions, &updated.rationale);
        let outcome = process_chunk(storage, embedder, llm, &combined, cancel).await?;

        storage.unlink_provenance(id)?;
        storage.link_provenance(id, &outcome.node_ids, &outcome.edge_ids)?;
        storage.garbage_collect_candidates(&old_node_ids, &old_edge_ids)?;

        Ok(updated)
    } else {
        storage.update_memory(id, patch)
    }
}

/// Deletes a memory and reclaims any node or edge whose provenance
/// reference count has dropped to zero as a result.
pub fn delete_memory(storage: &Storage, id: &str) -> Result<()> {
    let (node_ids, edge_ids) = storage.get_provenance_by_memory(id)?;
    storage.delete_memory(id)?;
    storage.garbage_collect_candidates(&node_ids, &edge_ids)?;
    Ok(())
}
