//! Performance benchmarks for the entity/relation extraction pipeline.

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use tokio::runtime::Runtime;

use graphmem::cancel::CancellationToken;
use graphmem::error::Result;
use graphmem::extraction::{extract_entities, extract_relations};
use graphmem::llm::{LlmClient, LlmTransport};

struct FixedTransport;

#[async_trait]
impl LlmTransport for FixedTransport {
    async fn complete_raw(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Extract named entities") {
            Ok(r#"{"entities": [
                {"name": "John Smith", "type": "Person", "description": "an engineer"},
                {"name": "Anthropic", "type": "Organization", "description": "an AI company"},
                {"name": "Claude", "type": "Product", "description": "an AI assistant"}
            ]}"#
            .to_string())
        } else {
            Ok(r#"{"triplets": [
                {"subject": "John Smith", "relation": "works at", "object": "Anthropic"},
                {"subject": "Anthropic", "relation": "builds", "object": "Claude"}
            ]}"#
            .to_string())
        }
    }
}

fn bench_extract_entities(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = LlmClient::new(FixedTransport);
    let text = "John Smith works at Anthropic on the Claude project. \
                They met yesterday to discuss semantic search and vector databases.";

    let mut group = c.benchmark_group("extract_entities");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("fixed_response", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cancel = CancellationToken::new();
                extract_entities(&client, text, &cancel).await.unwrap()
            })
        })
    });
    group.finish();
}

fn bench_extract_relations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = LlmClient::new(FixedTransport);
    let text = "John Smith works at Anthropic on the Claude project.";

    let mut group = c.benchmark_group("extract_relations");
    group.bench_function("fixed_response", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cancel = CancellationToken::new();
                let entities = extract_entities(&client, text, &cancel).await.unwrap();
                extract_relations(&client, text, &entities, &cancel).await.unwrap()
            })
        })
    });
    group.finish();
}

criterion_group!(benches, bench_extract_entities, bench_extract_relations);
criterion_main!(benches);
