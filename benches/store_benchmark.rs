use criterion::{Criterion, black_box, criterion_group, criterion_main};
use axon::core::config::{StoreConfig, VectorIndexConfig};
use axon::core::store::AxonStore;
use axon::core::types::{Document, DocumentId, FieldValue};
use axon::query::ast::LogicalNode;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

const DIMENSIONS: usize = 32;

fn random_doc(rng: &mut StdRng) -> Document {
    let embedding: Vec<f32> = (0..DIMENSIONS).map(|_| rng.r#gen::<f32>() - 0.5).collect();
    Document::new(DocumentId::new())
        .with_field(
            "genre",
            FieldValue::Text(format!("genre_{}", rng.gen_range(0..10))),
        )
        .with_field("year", FieldValue::Integer(rng.gen_range(1950..2026)))
        .with_field("embedding", FieldValue::Vector(embedding))
}

fn open_store(dir: &std::path::Path) -> AxonStore {
    let mut config = StoreConfig::new(dir);
    config.bucket_count = 256;
    config
        .vector_indexes
        .push(VectorIndexConfig::new("embedding", DIMENSIONS));
    config.string_indexes.push("genre".to_string());
    let store = AxonStore::open(config).unwrap();
    store.initialize().unwrap();
    store
}

fn bench_single_insert(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("single_document_insert", |b| {
        b.iter(|| {
            let doc = random_doc(&mut rng);
            store.add(black_box(&doc)).unwrap();
        });
    });
}

fn bench_hybrid_search(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..2_000 {
        store.add(&random_doc(&mut rng)).unwrap();
    }

    let query_vector: Vec<f32> = (0..DIMENSIONS).map(|_| rng.r#gen::<f32>() - 0.5).collect();
    let query = LogicalNode::all_of(vec![
        LogicalNode::is_similar_to("embedding", query_vector).unwrap(),
        LogicalNode::is_equal("genre", "genre_3").unwrap(),
        LogicalNode::is_greater_than("year", 1990).unwrap(),
    ])
    .unwrap();

    c.bench_function("hybrid_search_top_10", |b| {
        b.iter(|| {
            let results = store.search(black_box(&query), 10).unwrap();
            black_box(results);
        });
    });
}

criterion_group!(benches, bench_single_insert, bench_hybrid_search);
criterion_main!(benches);
