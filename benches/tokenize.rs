//! Performance benchmarks for a3s-pii
//!
//! Run with: cargo bench

use a3s_pii::{Entity, EntityType, Mapping, PiiEngine, PolicySelector, TokenRegistry, TokenScope};
use criterion::{criterion_group, criterion_main, Criterion};

fn sample_document(repeats: usize) -> (String, Vec<Entity>) {
    let mut text = String::new();
    let mut entities = Vec::new();
    for i in 0..repeats {
        let name = format!("Person Number{}", i % 50);
        let start = text.len();
        text.push_str(&name);
        entities.push(Entity::new(EntityType::Person, name.clone(), start, text.len()));
        text.push_str(" wrote from ");
        let email = format!("user{}@example.com", i % 50);
        let start = text.len();
        text.push_str(&email);
        entities.push(Entity::new(EntityType::EmailAddress, email, start, text.len()));
        text.push_str(" about the invoice.\n");
    }
    (text, entities)
}

fn bench_tokenize_entities(c: &mut Criterion) {
    let engine = PiiEngine::local().unwrap();

    let mut group = c.benchmark_group("tokenize_entities");
    for repeats in [10, 100, 1000] {
        let (text, entities) = sample_document(repeats);
        group.bench_function(format!("per_call {} lines", repeats), |b| {
            b.iter(|| {
                engine
                    .tokenize_entities(&text, entities.clone(), TokenScope::PerCall)
                    .unwrap()
            });
        });
        group.bench_function(format!("registry {} lines", repeats), |b| {
            b.iter(|| {
                engine
                    .tokenize_entities(&text, entities.clone(), TokenScope::Registry)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_detokenize(c: &mut Criterion) {
    let engine = PiiEngine::local().unwrap();
    let (text, entities) = sample_document(1000);
    let result = engine
        .tokenize_entities(&text, entities, TokenScope::PerCall)
        .unwrap();

    c.bench_function("detokenize 1000 lines", |b| {
        b.iter(|| engine.detokenize(&result.text, &result.mapping));
    });

    let empty = Mapping::new();
    c.bench_function("detokenize unresolved 1000 lines", |b| {
        b.iter(|| engine.detokenize(&result.text, &empty));
    });
}

fn bench_registry(c: &mut Criterion) {
    let registry = TokenRegistry::new();
    for i in 0..10_000 {
        registry.get_or_create(&format!("value-{}", i), EntityType::Person).unwrap();
    }

    c.bench_function("get_or_create hit", |b| {
        b.iter(|| registry.get_or_create("value-5000", EntityType::Person).unwrap());
    });

    c.bench_function("snapshot 10k", |b| {
        b.iter(|| registry.snapshot());
    });
}

fn bench_regex_detection(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = PiiEngine::local().unwrap();
    let text = "Reach hans.mueller@example.de or 555-123-4567, card 4111-1111-1111-1111. "
        .repeat(100);
    let selector = PolicySelector::named("strict");

    c.bench_function("tokenize regex detector 100 lines", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .tokenize(&text, &selector, TokenScope::PerCall)
                .await
                .unwrap()
        });
    });

    let docs: Vec<String> = (0..50).map(|i| format!("doc {} {}", i, text)).collect();
    c.bench_function("tokenize_batch 50 docs", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .tokenize_batch(&docs, &selector, TokenScope::Registry)
                .await
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_tokenize_entities,
    bench_detokenize,
    bench_registry,
    bench_regex_detection,
);
criterion_main!(benches);
