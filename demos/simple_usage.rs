/// Axon end-to-end walkthrough:
/// - open and initialize a store with a vector index and a string index
/// - add documents
/// - run a hybrid query (vector similarity AND attribute predicates)
/// - remove a document and search again

use axon::core::config::{StoreConfig, VectorIndexConfig};
use axon::core::store::AxonStore;
use axon::core::types::{Document, DocumentId, FieldValue};
use axon::query::ast::LogicalNode;

fn movie(genre: &str, year: i32, embedding: Vec<f32>) -> Document {
    Document::new(DocumentId::new())
        .with_field("genre", FieldValue::Text(genre.to_string()))
        .with_field("year", FieldValue::Integer(year))
        .with_field("embedding", FieldValue::Vector(embedding))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    println!("Opening store at {}...", dir.path().display());
    let mut config = StoreConfig::new(dir.path());
    config.bucket_count = 256;
    config.vector_indexes.push(VectorIndexConfig::new("embedding", 2));
    config.string_indexes.push("genre".to_string());

    let store = AxonStore::open(config)?;
    store.initialize()?;

    println!("Adding documents...");
    let a = movie("Sci-Fi", 1999, vec![1.0, 0.0]);
    let b = movie("Sci-Fi", 1985, vec![0.9, 0.1]);
    let c = movie("Horror", 1999, vec![0.95, 0.1]);
    store.add(&a)?;
    store.add(&b)?;
    store.add(&c)?;
    println!("  3 documents in, ids stay stable across restarts");

    println!("Hybrid query: similar to [1, 0] AND genre = Sci-Fi AND year > 1990");
    let query = LogicalNode::all_of(vec![
        LogicalNode::is_similar_to("embedding", vec![1.0, 0.0])?,
        LogicalNode::is_equal("genre", "Sci-Fi")?,
        LogicalNode::is_greater_than("year", 1990)?,
    ])?;
    for hit in store.search(&query, 10)? {
        let year = hit.document.get_field("year");
        println!("  {} ({:?}) score {:.3}", hit.document.id, year, hit.score);
    }

    println!("Removing the Horror title and searching by similarity only...");
    store.remove(&c.id)?;
    let similar = LogicalNode::is_similar_to("embedding", vec![1.0, 0.0])?;
    for hit in store.search(&similar, 10)? {
        println!("  {} score {:.3}", hit.document.id, hit.score);
    }

    store.close()?;
    println!("Done.");
    Ok(())
}
