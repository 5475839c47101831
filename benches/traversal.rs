//! Recursive-CTE graph traversal benchmark over a synthetic tree.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use graphmem::storage::Storage;
use graphmem::types::{EntityType, Node, Edge};

fn create_node(storage: &Storage, i: usize) -> String {
    let node = Node::new(format!("node-{i}"), EntityType::Concept, format!("synthetic node {i}"));
    storage.add_node(node).unwrap().id
}

/// Builds a tree of depth `max_depth` with the given `branching_factor` and
/// returns the root node id.
fn create_graph(storage: &Storage, branching_factor: usize, max_depth: usize) -> String {
    let root_id = create_node(storage, 0);
    let mut current_level = vec![root_id.clone()];
    let mut counter = 1;

    for _ in 0..max_depth {
        let mut next_level = Vec::new();
        for parent_id in &current_level {
            for _ in 0..branching_factor {
                let child_id = create_node(storage, counter);
                counter += 1;
                storage
                    .add_edge(Edge::new(parent_id.as_str(), "relates_to", child_id.as_str()))
                    .unwrap();
                next_level.push(child_id);
            }
        }
        current_level = next_level;
    }
    root_id
}

fn bench_traversal(c: &mut Criterion) {
    let storage = Storage::open_in_memory().unwrap();
    // depth 3, branching factor 5: ~156 nodes
    let root_id = create_graph(&storage, 5, 3);

    let mut group = c.benchmark_group("traversal");

    group.bench_function("get_neighbors_depth_3", |b| {
        b.iter(|| storage.get_neighbors(black_box(&root_id), 3).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_traversal);
criterion_main!(benches);
