use std::path::PathBuf;
use std::sync::Arc;
use rayon::prelude::*;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    Document, DocumentId, DocumentShape, FieldValue, InternalId, deserialize_shape,
    serialize_shape,
};
use crate::storage::field_store::FieldStore;
use crate::storage::kv_store::KVStore;

pub const DICTIONARY_DIR: &str = "dictionary";

#[derive(Debug)]
pub struct FieldWriteResult {
    pub field: String,
    pub offset: i64,
    pub error: Option<String>,
}

/// Outcome of persisting one document. Per-field failures are aggregated
/// here instead of aborting the batch midway; on any failure the shape is
/// never written and the document has no internal id.
#[derive(Debug)]
pub struct DocumentWriteResult {
    pub internal_id: Option<InternalId>,
    pub fields: Vec<FieldWriteResult>,
}

impl DocumentWriteResult {
    pub fn is_success(&self) -> bool {
        self.internal_id.is_some()
    }

    pub fn into_error(self, id: &DocumentId) -> Error {
        let failed: Vec<String> = self
            .fields
            .iter()
            .filter_map(|f| f.error.as_ref().map(|e| format!("{}: {}", f.field, e)))
            .collect();
        Error::new(
            ErrorKind::InvalidInput,
            format!("document {} rejected ({})", id, failed.join("; ")),
        )
    }
}

/// Assigns internal ids and fans documents out over the per-field stores.
///
/// The dictionary maps `documentId → shape`; the offset of the shape entry
/// in the dictionary's DataLog *is* the internal id, which makes internal
/// ids monotonically increasing with insertion order.
pub struct DocumentPersister {
    dictionary: Arc<KVStore>,
    fields: Arc<FieldStore>,
    pool: rayon::ThreadPool,
}

impl DocumentPersister {
    pub fn open(root: impl Into<PathBuf>, bucket_count: u32, write_threads: usize) -> Result<Self> {
        let root = root.into();
        let dictionary = Arc::new(KVStore::open_with_buckets(
            root.join(DICTIONARY_DIR),
            bucket_count,
        )?);
        let fields = Arc::new(FieldStore::open(&root, bucket_count)?);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(write_threads.max(1))
            .build()
            .map_err(|e| Error::new(ErrorKind::Io, format!("field write pool: {}", e)))?;
        Ok(DocumentPersister {
            dictionary,
            fields,
            pool,
        })
    }

    /// Persist a document: fields in parallel, then batch-commit, then the
    /// shape (whose dictionary offset becomes the internal id).
    pub fn write(&self, document: &Document) -> Result<DocumentWriteResult> {
        document.validate()?;
        let key = document.id.to_string();

        let entries: Vec<(&String, &FieldValue)> = document.fields.iter().collect();
        let fields = self.pool.install(|| {
            entries
                .par_iter()
                .map(|(name, value)| match self.fields.put(name, &key, value, false) {
                    Ok(offset) => FieldWriteResult {
                        field: (*name).clone(),
                        offset: offset as i64,
                        error: None,
                    },
                    Err(e) => FieldWriteResult {
                        field: (*name).clone(),
                        offset: -1,
                        error: Some(e.to_string()),
                    },
                })
                .collect::<Vec<_>>()
        });

        if fields.iter().any(|f| f.error.is_some()) {
            return Ok(DocumentWriteResult {
                internal_id: None,
                fields,
            });
        }

        self.fields.commit_all()?;
        let shape = serialize_shape(&document.shape())?;
        let internal_id = self.dictionary.put_bytes(&key, &shape, true)?;
        Ok(DocumentWriteResult {
            internal_id: Some(internal_id),
            fields,
        })
    }

    fn assemble(&self, id: &DocumentId, key: &str, shape: &DocumentShape) -> Result<Document> {
        let mut document = Document::new(*id);
        for (field, kind) in shape {
            match self.fields.get(field, *kind, key)? {
                Some(value) => document.add_field(field.clone(), value),
                None => {
                    return Err(Error::corruption(format!(
                        "document {} lists field '{}' but its value is missing",
                        id, field
                    )));
                }
            }
        }
        Ok(document)
    }

    pub fn read(&self, id: &DocumentId) -> Result<Option<Document>> {
        let key = id.to_string();
        let Some(shape_bytes) = self.dictionary.get_bytes(&key)? else {
            return Ok(None);
        };
        let shape = deserialize_shape(&shape_bytes)?;
        Ok(Some(self.assemble(id, &key, &shape)?))
    }

    /// Read straight from the dictionary log, bypassing the hash index;
    /// valid for any internal id ever assigned, live or not.
    pub fn read_by_internal_id(&self, internal_id: InternalId) -> Result<Document> {
        let (key, shape_value) = self.dictionary.entry_at(internal_id)?;
        let FieldValue::Bytes(shape_bytes) = shape_value else {
            return Err(Error::corruption(format!(
                "dictionary entry {} does not hold a shape",
                internal_id
            )));
        };
        let id = DocumentId::parse(&key)?;
        let shape = deserialize_shape(&shape_bytes)?;
        self.assemble(&id, &key, &shape)
    }

    /// Whether `internal_id` is the current dictionary binding for its
    /// document (false once the document was removed or re-added).
    pub fn is_live(&self, internal_id: InternalId) -> Result<bool> {
        let (key, _) = self.dictionary.entry_at(internal_id)?;
        Ok(self.dictionary.offset_of(&key)? == Some(internal_id))
    }

    /// Read a single field of a live document without assembling the rest.
    pub fn read_field(&self, internal_id: InternalId, field: &str) -> Result<Option<FieldValue>> {
        let (key, shape_value) = self.dictionary.entry_at(internal_id)?;
        let FieldValue::Bytes(shape_bytes) = shape_value else {
            return Err(Error::corruption(format!(
                "dictionary entry {} does not hold a shape",
                internal_id
            )));
        };
        let shape = deserialize_shape(&shape_bytes)?;
        let Some(kind) = shape.get(field) else {
            return Ok(None);
        };
        self.fields.get(field, *kind, &key)
    }

    pub fn remove(&self, id: &DocumentId) -> Result<bool> {
        let key = id.to_string();
        let Some(shape_bytes) = self.dictionary.get_bytes(&key)? else {
            return Ok(false);
        };
        let shape = deserialize_shape(&shape_bytes)?;
        for (field, kind) in &shape {
            self.fields.remove(field, *kind, &key)?;
        }
        self.fields.commit_all()?;
        self.dictionary.remove(&key)?;
        self.dictionary.commit()?;
        Ok(true)
    }

    /// Internal id of the live dictionary binding for `id`.
    pub fn internal_id_of(&self, id: &DocumentId) -> Result<Option<InternalId>> {
        self.dictionary.offset_of(&id.to_string())
    }

    /// All live internal ids, ascending (insertion order).
    pub fn internal_ids(&self) -> Result<Vec<InternalId>> {
        self.dictionary.value_offsets()
    }

    pub fn document_count(&self) -> Result<usize> {
        Ok(self.internal_ids()?.len())
    }

    pub fn commit_all(&self) -> Result<()> {
        self.fields.commit_all()?;
        self.dictionary.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn persister(dir: &std::path::Path) -> DocumentPersister {
        DocumentPersister::open(dir, 8, 2).unwrap()
    }

    fn sample(id: DocumentId) -> Document {
        Document::new(id)
            .with_field("genre", FieldValue::Text("Sci-Fi".into()))
            .with_field("year", FieldValue::Integer(1999))
            .with_field("embedding", FieldValue::Vector(vec![1.0, 0.0]))
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let id = DocumentId::new();
        let doc = sample(id);

        let result = persister.write(&doc).unwrap();
        assert!(result.is_success());
        assert_eq!(result.fields.len(), 3);

        let read = persister.read(&id).unwrap().unwrap();
        assert_eq!(read, doc);
    }

    #[test]
    fn internal_ids_increase_with_insertion_order() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let mut ids = Vec::new();
        for _ in 0..5 {
            let doc = sample(DocumentId::new());
            ids.push(persister.write(&doc).unwrap().internal_id.unwrap());
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(persister.internal_ids().unwrap(), ids);
    }

    #[test]
    fn re_adding_replaces_the_live_mapping() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let id = DocumentId::new();

        let first = persister.write(&sample(id)).unwrap().internal_id.unwrap();
        let updated = sample(id).with_field("year", FieldValue::Integer(2001));
        let second = persister.write(&updated).unwrap().internal_id.unwrap();

        assert!(second > first);
        assert!(!persister.is_live(first).unwrap());
        assert!(persister.is_live(second).unwrap());
        assert_eq!(persister.internal_ids().unwrap(), vec![second]);

        let read = persister.read(&id).unwrap().unwrap();
        assert_eq!(read.get_field("year"), Some(&FieldValue::Integer(2001)));
        // The superseded shape is still readable by its raw offset; the
        // field stores themselves are last-write-wins per document key.
        let stale = persister.read_by_internal_id(first).unwrap();
        assert_eq!(stale.id, id);
        assert_eq!(stale.get_field("year"), Some(&FieldValue::Integer(2001)));
    }

    #[test]
    fn remove_clears_fields_and_dictionary() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let id = DocumentId::new();
        let internal = persister.write(&sample(id)).unwrap().internal_id.unwrap();

        assert!(persister.remove(&id).unwrap());
        assert_eq!(persister.read(&id).unwrap(), None);
        assert!(!persister.is_live(internal).unwrap());
        assert!(!persister.remove(&id).unwrap());
        assert_eq!(persister.document_count().unwrap(), 0);
    }

    #[test]
    fn invalid_document_writes_nothing() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let id = DocumentId::new();
        let doc = Document::new(id).with_field(
            "m",
            FieldValue::Matrix(vec![vec![1.0], vec![2.0, 3.0]]),
        );
        assert!(persister.write(&doc).is_err());
        assert_eq!(persister.read(&id).unwrap(), None);
    }

    #[test]
    fn read_field_checks_shape() {
        let dir = tempdir().unwrap();
        let persister = persister(dir.path());
        let id = DocumentId::new();
        let internal = persister.write(&sample(id)).unwrap().internal_id.unwrap();

        assert_eq!(
            persister.read_field(internal, "year").unwrap(),
            Some(FieldValue::Integer(1999))
        );
        assert_eq!(persister.read_field(internal, "missing").unwrap(), None);
    }
}
