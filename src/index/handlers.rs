use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::{Document, FieldValue, InternalId};
use crate::index::hnsw::{HnswConfig, HnswIndex};
use crate::index::inverted::InvertedIndex;
use crate::index::paged_longs::PagedLongArray;
use crate::query::ast::{LeafNode, Operation};

/// One candidate produced by an index lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexMatch {
    pub internal_id: InternalId,
    pub score: f32,
}

/// Field-level adapter between documents and one physical index.
pub trait IndexHandler: Send + Sync {
    fn field(&self) -> &str;

    /// Whether this handler can resolve the given operation from its index.
    fn supports(&self, operation: Operation) -> bool;

    /// Index one document; must be idempotent so WAL replay can re-apply.
    fn index(&self, internal_id: InternalId, document: &Document) -> Result<()>;

    fn remove(&self, internal_id: InternalId, document: &Document) -> Result<()>;

    fn search(&self, leaf: &LeafNode, max_results: usize) -> Result<Vec<IndexMatch>>;

    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// HNSW adapter for one vector field. Keeps the `documentIdMap` from
/// HNSW-local vector ids to persister internal ids; graph entries are never
/// deleted, so removal only tombstones the map.
pub struct HnswIndexHandler {
    field: String,
    index: RwLock<HnswIndex>,
    document_id_map: PagedLongArray,
    indexed: RwLock<RoaringTreemap>,
}

impl HnswIndexHandler {
    pub fn open(root: &Path, field: &str, config: HnswConfig) -> Result<Self> {
        let base = root.join("hnsw").join(field);
        let index = HnswIndex::open(&base, config)?;
        let document_id_map = PagedLongArray::open(base.join("id_map"), index.len())?;

        let mut indexed = RoaringTreemap::new();
        for vector_id in 0..document_id_map.len() {
            let doc = document_id_map.get(vector_id)?;
            if doc >= 0 {
                indexed.insert(doc as u64);
            }
        }

        Ok(HnswIndexHandler {
            field: field.to_string(),
            index: RwLock::new(index),
            document_id_map,
            indexed: RwLock::new(indexed),
        })
    }
}

impl IndexHandler for HnswIndexHandler {
    fn field(&self) -> &str {
        &self.field
    }

    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::VectorSimilar
    }

    fn index(&self, internal_id: InternalId, document: &Document) -> Result<()> {
        let Some(value) = document.get_field(&self.field) else {
            return Ok(());
        };
        let FieldValue::Vector(vector) = value else {
            return Err(Error::invalid_input(format!(
                "field '{}' is of invalid type for a vector index",
                self.field
            )));
        };
        if self.indexed.read().contains(internal_id) {
            return Ok(());
        }

        let vector_id = self.index.write().insert(vector)?;
        self.document_id_map.set(vector_id, internal_id as i64)?;
        self.indexed.write().insert(internal_id);
        Ok(())
    }

    fn remove(&self, internal_id: InternalId, _document: &Document) -> Result<()> {
        // The vector stays in the graph; only the bridge entry dies.
        for vector_id in 0..self.document_id_map.len() {
            if self.document_id_map.get(vector_id)? == internal_id as i64 {
                self.document_id_map.set(vector_id, -1)?;
            }
        }
        self.indexed.write().remove(internal_id);
        Ok(())
    }

    fn search(&self, leaf: &LeafNode, max_results: usize) -> Result<Vec<IndexMatch>> {
        let FieldValue::Vector(query) = &leaf.value else {
            return Err(Error::invalid_input(
                "vector index queried with a non-vector operand",
            ));
        };
        let hits = self.index.read().search(query, max_results)?;
        let mut matches = Vec::with_capacity(hits.len());
        for (vector_id, score) in hits {
            let doc = self.document_id_map.get(vector_id)?;
            if doc >= 0 {
                matches.push(IndexMatch {
                    internal_id: doc as u64,
                    score,
                });
            }
        }
        Ok(matches)
    }

    fn flush(&self) -> Result<()> {
        self.index.read().flush()?;
        self.document_id_map.flush()
    }

    fn close(&self) -> Result<()> {
        self.index.read().close()?;
        self.document_id_map.flush()
    }
}

/// Inverted-index adapter for one string field.
pub struct StringIndexHandler {
    field: String,
    index: InvertedIndex,
}

impl StringIndexHandler {
    pub fn open(root: &Path, field: &str, bucket_count: u32) -> Result<Self> {
        let index = InvertedIndex::open(root.join("inverted").join(field), bucket_count)?;
        Ok(StringIndexHandler {
            field: field.to_string(),
            index,
        })
    }
}

impl IndexHandler for StringIndexHandler {
    fn field(&self) -> &str {
        &self.field
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::StringEquals
                | Operation::StringStartsWith
                | Operation::StringEndsWith
                | Operation::StringContains
        )
    }

    fn index(&self, internal_id: InternalId, document: &Document) -> Result<()> {
        let Some(value) = document.get_field(&self.field) else {
            return Ok(());
        };
        let FieldValue::Text(term) = value else {
            return Err(Error::invalid_input(format!(
                "field '{}' is of invalid type for a string index",
                self.field
            )));
        };
        if self.index.contains(term, internal_id)? {
            return Ok(());
        }
        self.index.add(term, internal_id)
    }

    fn remove(&self, internal_id: InternalId, document: &Document) -> Result<()> {
        if let Some(FieldValue::Text(term)) = document.get_field(&self.field) {
            self.index.remove(term, internal_id)?;
        }
        Ok(())
    }

    fn search(&self, leaf: &LeafNode, _max_results: usize) -> Result<Vec<IndexMatch>> {
        let FieldValue::Text(value) = &leaf.value else {
            return Err(Error::invalid_input(
                "string index queried with a non-string operand",
            ));
        };
        Ok(self
            .index
            .matching_ids(leaf.operation, value)?
            .into_iter()
            .map(|internal_id| IndexMatch {
                internal_id,
                score: 1.0,
            })
            .collect())
    }

    fn flush(&self) -> Result<()> {
        self.index.flush()
    }

    fn close(&self) -> Result<()> {
        self.index.commit()
    }
}

/// The store's set of field handlers, consulted by the query splitter.
#[derive(Default)]
pub struct IndexRegistry {
    handlers: HashMap<String, Arc<dyn IndexHandler>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        IndexRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn IndexHandler>) {
        self.handlers.insert(handler.field().to_string(), handler);
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.handlers.contains_key(field)
    }

    /// Handler able to resolve this leaf from an index, if any.
    pub fn handler_for(&self, leaf: &LeafNode) -> Option<Arc<dyn IndexHandler>> {
        self.handlers
            .get(&leaf.field)
            .filter(|handler| handler.supports(leaf.operation))
            .cloned()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn IndexHandler>> {
        self.handlers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocumentId;
    use tempfile::tempdir;

    fn vector_doc(v: Vec<f32>) -> Document {
        Document::new(DocumentId::new()).with_field("embedding", FieldValue::Vector(v))
    }

    #[test]
    fn hnsw_handler_maps_ids_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let handler =
            HnswIndexHandler::open(dir.path(), "embedding", HnswConfig::new(2)).unwrap();

        handler.index(100, &vector_doc(vec![1.0, 0.0])).unwrap();
        handler.index(100, &vector_doc(vec![1.0, 0.0])).unwrap();
        handler.index(200, &vector_doc(vec![0.0, 1.0])).unwrap();

        let leaf = LeafNode::new(
            "embedding",
            Operation::VectorSimilar,
            FieldValue::Vector(vec![1.0, 0.0]),
        )
        .unwrap();
        let matches = handler.search(&leaf, 10).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].internal_id, 100);
        assert!(matches[0].score > matches[1].score);
    }

    #[test]
    fn hnsw_remove_tombstones_the_map() {
        let dir = tempdir().unwrap();
        let handler =
            HnswIndexHandler::open(dir.path(), "embedding", HnswConfig::new(2)).unwrap();
        let doc = vector_doc(vec![1.0, 0.0]);
        handler.index(7, &doc).unwrap();
        handler.remove(7, &doc).unwrap();

        let leaf = LeafNode::new(
            "embedding",
            Operation::VectorSimilar,
            FieldValue::Vector(vec![1.0, 0.0]),
        )
        .unwrap();
        assert!(handler.search(&leaf, 10).unwrap().is_empty());
    }

    #[test]
    fn string_handler_round_trip() {
        let dir = tempdir().unwrap();
        let handler = StringIndexHandler::open(dir.path(), "genre", 8).unwrap();
        let doc = Document::new(DocumentId::new())
            .with_field("genre", FieldValue::Text("Sci-Fi".into()));
        handler.index(1, &doc).unwrap();
        handler.index(1, &doc).unwrap();

        let leaf =
            LeafNode::new("genre", Operation::StringEquals, FieldValue::Text("Sci-Fi".into()))
                .unwrap();
        let matches = handler.search(&leaf, 10).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].internal_id, 1);

        handler.remove(1, &doc).unwrap();
        assert!(handler.search(&leaf, 10).unwrap().is_empty());
    }

    #[test]
    fn wrong_field_type_is_invalid_input() {
        let dir = tempdir().unwrap();
        let handler = StringIndexHandler::open(dir.path(), "genre", 8).unwrap();
        let doc = Document::new(DocumentId::new()).with_field("genre", FieldValue::Integer(3));
        assert!(handler.index(1, &doc).is_err());
    }

    #[test]
    fn registry_filters_by_operation() {
        let dir = tempdir().unwrap();
        let mut registry = IndexRegistry::new();
        registry.register(Arc::new(
            StringIndexHandler::open(dir.path(), "genre", 8).unwrap(),
        ));

        assert!(registry.is_indexed("genre"));
        assert!(!registry.is_indexed("year"));

        let eq = LeafNode::new("genre", Operation::StringEquals, FieldValue::Text("x".into()))
            .unwrap();
        assert!(registry.handler_for(&eq).is_some());

        // An integer comparison cannot be answered by a string index even
        // though the field is indexed.
        let lt =
            LeafNode::new("genre", Operation::IntLessThan, FieldValue::Integer(5)).unwrap();
        assert!(registry.handler_for(&lt).is_none());
    }
}
