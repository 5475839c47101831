//! Search pipeline (C9): vector, bounded graph expansion, and hybrid
//! fusion, with decay-aware scoring and post-search access reinforcement.

use std::collections::HashMap;

use chrono::Utc;

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::{EngramError, Result};
use crate::lifecycle::decay_multiplier;
use crate::storage::Storage;
use crate::types::{MatchSource, Memory, Node, SearchOptions, SearchResult, SearchType};

/// Runs `options.search_type` against `query`, applies decay scoring, and
/// (unless `include_memory_ids` opts the memory store out) reinforces
/// access timestamps on whatever nodes and memories were actually
/// returned.
pub async fn search(
    storage: &Storage,
    embedder: &dyn Embedder,
    config: &EngineConfig,
    query: &str,
    options: &SearchOptions,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>> {
    let mut results = match options.search_type {
        SearchType::Vector => vector_search(storage, embedder, query, options.top_k, cancel).await?,
        SearchType::Graph => graph_search(storage, options)?,
        SearchType::Hybrid => hybrid_search(storage, embedder, query, options, cancel).await?,
    };

    apply_decay(storage, config, &mut results)?;
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    reinforce_access(storage, options, &mut results);

    Ok(results)
}

async fn vector_search(
    storage: &Storage,
    embedder: &dyn Embedder,
    query: &str,
    top_k: usize,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>> {
    let embedding = embedder.embed(query, cancel).await?;
    vector_search_from_embedding(storage, &embedding, top_k)
}

/// Shared by `vector_search` and hybrid's candidate-gathering step: one ANN
/// query, then one batched node load preserving ANN order (never a
/// `get_node` per hit, which would both N+1 and prematurely bump access
/// time ahead of the batched reinforcement pass at the end).
fn vector_search_from_embedding(storage: &Storage, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
    let matches = storage.vector_search(embedding, top_k)?;
    let ids: Vec<String> = matches.iter().map(|m| m.node_id.clone()).collect();
    let nodes = storage.nodes_by_ids(&ids)?;

    Ok(matches
        .into_iter()
        .filter_map(|m| {
            nodes.get(&m.node_id).map(|node| SearchResult {
                node: node.clone(),
                score: m.score as f64,
                source: MatchSource::Vector,
                depth: None,
                memory_ids: None,
            })
        })
        .collect())
}

fn graph_search(storage: &Storage, options: &SearchOptions) -> Result<Vec<SearchResult>> {
    if options.seed_node_ids.is_empty() {
        return Err(EngramError::Validation("graph search requires seed_node_ids".into()));
    }

    let mut best_depth: HashMap<String, usize> = HashMap::new();
    let mut nodes_by_id: HashMap<String, Node> = HashMap::new();

    for seed in &options.seed_node_ids {
        for (node, depth) in storage.get_neighbors(seed, options.depth)? {
            best_depth.entry(node.id.clone()).or_insert(depth);
            nodes_by_id.entry(node.id.clone()).or_insert(node);
        }
    }

    Ok(best_depth
        .into_iter()
        .map(|(id, depth)| SearchResult {
            node: nodes_by_id.remove(&id).expect("node inserted alongside its depth"),
            score: 1.0 / (1.0 + depth as f64),
            source: MatchSource::Graph,
            depth: Some(depth),
            memory_ids: None,
        })
        .collect())
}

async fn hybrid_search(
    storage: &Storage,
    embedder: &dyn Embedder,
    query: &str,
    options: &SearchOptions,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>> {
    let candidate_k = (options.top_k * 2).max(20);
    let embedding = embedder.embed(query, cancel).await?;
    let vector_hits = vector_search_from_embedding(storage, &embedding, candidate_k)?;

    let mut merged: HashMap<String, SearchResult> = HashMap::new();
    for hit in vector_hits {
        merged.insert(hit.node.id.clone(), hit);
    }

    for seed_id in merged.keys().cloned().collect::<Vec<_>>() {
        for (node, depth) in storage.get_neighbors(&seed_id, options.depth)? {
            let graph_score = 1.0 / (1.0 + depth as f64);
            merged
                .entry(node.id.clone())
                .and_modify(|existing| {
                    existing.score += graph_score;
                    existing.source = MatchSource::Hybrid;
                    existing.depth = Some(depth);
                })
                .or_insert(SearchResult {
                    node,
                    score: graph_score,
                    source: MatchSource::Graph,
                    depth: Some(depth),
                    memory_ids: None,
                });
        }
    }

    let mut results: Vec<SearchResult> = merged.into_values().collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(options.top_k);
    Ok(results)
}

/// Applies the decay multiplier in place when `config.decay_enabled`,
/// looking up each node's owning memory in one batched round-trip rather
/// than per result.
fn apply_decay(storage: &Storage, config: &EngineConfig, results: &mut [SearchResult]) -> Result<()> {
    if !config.decay_enabled || results.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = results.iter().map(|r| r.node.id.clone()).collect();
    let owners = storage.get_memories_by_node_id_batched(&ids)?;
    let now = Utc::now();

    for result in results.iter_mut() {
        let owning_memory: Option<Memory> = owners
            .get(&result.node.id)
            .and_then(|ids| ids.first())
            .and_then(|id| storage.peek_memory(id).ok());
        let multiplier = decay_multiplier(&result.node, owning_memory.as_ref(), config, now);
        result.score *= multiplier;
    }

    Ok(())
}

/// Best-effort: batch-bumps graph access timestamps for every returned
/// node, and (when `include_memory_ids`) enriches each result with its
/// owning memory ids and batch-bumps their access tracking too. Failures
/// here are swallowed — a search must never fail because reinforcement
/// did.
fn reinforce_access(storage: &Storage, options: &SearchOptions, results: &mut [SearchResult]) {
    if results.is_empty() {
        return;
    }

    let node_ids: Vec<String> = results.iter().map(|r| r.node.id.clone()).collect();
    let _ = storage.update_access_time(&node_ids);

    if !options.include_memory_ids {
        return;
    }

    let owners = match storage.get_memories_by_node_id_batched(&node_ids) {
        Ok(owners) => owners,
        Err(_) => return,
    };

    for result in results.iter_mut() {
        result.memory_ids = owners.get(&result.node.id).cloned();
    }

    let mut all_memory_ids: Vec<String> = owners.values().flatten().cloned().collect();
    all_memory_ids.sort();
    all_memory_ids.dedup();
    let _ = storage.batch_update_memory_access(&all_memory_ids);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TfIdfEmbedder;
    use crate::types::{Edge, EntityType, Node};

    fn storage_with(a_text: &str, b_text: &str) -> (Storage, Node, Node, TfIdfEmbedder) {
        let storage = Storage::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::new(1536);
        let a = storage.add_node(Node::new("A", EntityType::Concept, a_text)).unwrap();
        let b = storage.add_node(Node::new("B", EntityType::Concept, b_text)).unwrap();
        (storage, a, b, embedder)
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity() {
        let (storage, a, b, embedder) = storage_with("rust programming language", "banana bread recipe");
        let cancel = CancellationToken::new();

        let emb_a = embedder.embed(&a.description, &cancel).await.unwrap();
        storage.vector_add(&a.id, &emb_a).unwrap();
        let emb_b = embedder.embed(&b.description, &cancel).await.unwrap();
        storage.vector_add(&b.id, &emb_b).unwrap();

        let config = EngineConfig {
            decay_enabled: false,
            ..EngineConfig::default()
        };
        let options = SearchOptions {
            search_type: SearchType::Vector,
            top_k: 5,
            include_memory_ids: false,
            ..Default::default()
        };
        let results = search(&storage, &embedder, &config, "rust programming", &options, &cancel)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].node.id, a.id);
        assert_eq!(results[0].source, MatchSource::Vector);
    }

    #[test]
    fn graph_search_requires_seed_ids() {
        let storage = Storage::open_in_memory().unwrap();
        let err = graph_search(
            &storage,
            &SearchOptions {
                search_type: SearchType::Graph,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngramError::Validation(_)));
    }

    #[test]
    fn graph_search_scores_by_inverse_depth() {
        let storage = Storage::open_in_memory().unwrap();
        let a = storage.add_node(Node::new("A", EntityType::Concept, "")).unwrap();
        let b = storage.add_node(Node::new("B", EntityType::Concept, "")).unwrap();
        let c = storage.add_node(Node::new("C", EntityType::Concept, "")).unwrap();
        storage.add_edge(Edge::new(a.id.as_str(), "links", b.id.as_str())).unwrap();
        storage.add_edge(Edge::new(b.id.as_str(), "links", c.id.as_str())).unwrap();

        let options = SearchOptions {
            search_type: SearchType::Graph,
            depth: 2,
            seed_node_ids: vec![a.id.clone()],
            ..Default::default()
        };
        let results = graph_search(&storage, &options).unwrap();
        let b_result = results.iter().find(|r| r.node.id == b.id).unwrap();
        let c_result = results.iter().find(|r| r.node.id == c.id).unwrap();
        assert!((b_result.score - 0.5).abs() < 1e-9);
        assert!((c_result.score - (1.0 / 3.0)).abs() < 1e-9);
    }

    /// Scenario S4: a node found by vector at 0.6 and reached from a seed
    /// at depth 1 (graph score 0.5) merges into one hybrid result at 1.1.
    #[test]
    fn hybrid_merge_adds_scores_for_nodes_found_both_ways() {
        use crate::types::SearchResult;

        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        let node = Node::new("N", EntityType::Concept, "");
        merged.insert(
            node.id.clone(),
            SearchResult {
                node: node.clone(),
                score: 0.6,
                source: MatchSource::Vector,
                depth: None,
                memory_ids: None,
            },
        );

        let graph_score = 1.0 / (1.0 + 1.0);
        merged.entry(node.id.clone()).and_modify(|existing| {
            existing.score += graph_score;
            existing.source = MatchSource::Hybrid;
        });

        let result = &merged[&node.id];
        assert!((result.score - 1.1).abs() < 1e-9);
        assert_eq!(result.source, MatchSource::Hybrid);
    }

    #[tokio::test]
    async fn search_enriches_memory_ids_and_reinforces_access() {
        let storage = Storage::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::new(256);
        let node = storage.add_node(Node::new("A", EntityType::Concept, "topic text")).unwrap();
        let cancel = CancellationToken::new();
        let emb = embedder.embed(&node.description, &cancel).await.unwrap();
        storage.vector_add(&node.id, &emb).unwrap();

        let memory = storage
            .add_memory(crate::types::Memory {
                id: crate::types::new_memory_id(),
                topic: "t".into(),
                context: "c".into(),
                decisions: vec![],
                rationale: vec![],
                metadata: Default::default(),
                doc_hash: crate::types::compute_doc_hash("t", "c", &[], &[]),
                source: None,
                version: 1,
                status: crate::types::MemoryStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                access_count: 0,
                last_accessed_at: None,
                access_velocity: 0.0,
                superseded_by: None,
                retention_policy: crate::types::RetentionPolicy::Standard,
                retention_until: None,
                pinned: false,
                pinned_at: None,
                pinned_reason: None,
            })
            .unwrap();
        storage.link_provenance(&memory.id, &[node.id.clone()], &[]).unwrap();

        let config = EngineConfig::default();
        let options = SearchOptions {
            search_type: SearchType::Vector,
            include_memory_ids: true,
            ..Default::default()
        };
        let results = search(&storage, &embedder, &config, "topic text", &options, &cancel)
            .await
            .unwrap();
        assert_eq!(results[0].memory_ids.as_deref(), Some(&[memory.id.clone()][..]));

        let reloaded_node = storage.get_node(&node.id).unwrap().unwrap();
        assert!(reloaded_node.last_accessed_at.is_some());
        let reloaded_memory = storage.peek_memory(&memory.id).unwrap();
        assert_eq!(reloaded_memory.access_count, 1);
    }
}
